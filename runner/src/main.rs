use clap::{ArgAction, Parser};
use log::info;
use runner::arena::{ArenaFactory, ArenaSettings};
use runner::config::{parse_switch, parse_transcript, RunnerConfig, SlotSpec};
use runner::error::RunnerError;
use runner::lineup::Lineup;
use runner::operator::spawn_operator_input;
use runner::replay::{ReplayEngine, ReplayFactory};
use runner::scheduler::{MatchFactory, TerminationPolicy, TickScheduler};
use shared::{CLIENT_WAIT_TIMEOUT, MAX_TICK_COUNT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Player, repeatable: keyboard, simple_bot, "tcpclient PORT" or a strategy command line
    #[arg(short = 'p', long = "player")]
    players: Vec<String>,

    /// Log the exchanges of a process player, as SLOT=PATH
    #[arg(long = "transcript", value_parser = parse_transcript)]
    transcripts: Vec<(usize, PathBuf)>,

    /// End the match at --max-tick-count (on/off)
    #[arg(short = 't', long, default_value = "on", value_parser = parse_switch, action = ArgAction::Set)]
    timeout: bool,

    /// Enforce the total execution budget of external strategies (on/off)
    #[arg(long, default_value = "on", value_parser = parse_switch, action = ArgAction::Set)]
    check_execution_limit: bool,

    #[arg(long, default_value_t = MAX_TICK_COUNT)]
    max_tick_count: u64,

    /// Replay a recorded match (visio, plain or gzipped)
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Scheduling rate (ticks per second)
    #[arg(long, default_value = "200", value_parser = clap::value_parser!(u32).range(1..))]
    tick_rate: u32,

    /// Seconds to wait for each tcp client
    #[arg(long, default_value_t = CLIENT_WAIT_TIMEOUT.as_secs())]
    wait_timeout: u64,

    /// Write the finished match to this file (gzipped visio)
    #[arg(long)]
    save: Option<PathBuf>,

    /// Seed for bots and bonus placement
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Play one match without operator controls, then exit
    #[arg(long)]
    exit_on_end: bool,
}

fn build_config(args: &Args) -> Result<RunnerConfig, RunnerError> {
    let slots = args
        .players
        .iter()
        .map(|player| SlotSpec::parse(player))
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = RunnerConfig {
        slots,
        timeout_enabled: args.timeout,
        check_execution_limit: args.check_execution_limit,
        max_tick_count: args.max_tick_count,
        tick_period: Duration::from_secs_f64(1.0 / f64::from(args.tick_rate)),
        wait_timeout: Duration::from_secs(args.wait_timeout),
        replay: args.replay.clone(),
        save_path: args.save.clone(),
        seed: args.seed,
        ..RunnerConfig::default()
    };
    for (slot, path) in &args.transcripts {
        config.set_transcript(*slot, path.clone())?;
    }

    config.validate()?;
    Ok(config)
}

async fn drive<F: MatchFactory>(
    mut scheduler: TickScheduler<F>,
    exit_on_end: bool,
) -> Result<(), RunnerError> {
    if exit_on_end {
        scheduler.run_to_end().await
    } else {
        info!("Controls: w/a/s/d + Enter to steer, r to restart, q to quit");
        scheduler.run(spawn_operator_input(tokio::io::stdin())).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let policy = TerminationPolicy::from_config(&config);

    match &config.replay {
        Some(path) => {
            let engine = ReplayEngine::load(path)?;
            let settings = ArenaSettings::from_descriptor(engine.log().descriptor(), config.seed);
            let factory = ReplayFactory::new(engine.clone(), ArenaFactory::new(settings));
            let scheduler =
                TickScheduler::new(factory, Lineup::replay(engine), policy, config.tick_period);
            drive(scheduler, args.exit_on_end).await?;
        }
        None => {
            let factory = ArenaFactory::new(ArenaSettings::from_config(&config));
            let scheduler =
                TickScheduler::new(factory, Lineup::live(&config), policy, config.tick_period);
            drive(scheduler, args.exit_on_end).await?;
        }
    }

    info!("Runner finished");
    Ok(())
}
