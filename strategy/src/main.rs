use clap::Parser;
use log::info;
use strategy::network;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runner address to connect to; plays over stdin/stdout when omitted
    #[arg(short = 'c', long)]
    connect: Option<String>,

    /// Identity announced to the runner over tcp
    #[arg(short = 'i', long, default_value = "sample_strategy")]
    solution_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let ticks = match &args.connect {
        Some(addr) => network::play_tcp(addr, &args.solution_id).await?,
        None => network::play_stdio().await?,
    };

    info!("Played {} ticks", ticks);
    Ok(())
}
