use crate::game::{Board, Pilot};
use log::{debug, info, warn};
use shared::{decode_line, encode_line, CommandReply, Hello, Message, MessageKind};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Plays one match over a line stream.
///
/// Sends the hello line first when `solution_id` is set (TCP), answers every
/// `tick` message with one command line and returns the number of ticks
/// answered once `end_game` arrives or the runner closes the stream.
pub async fn play<R, W>(reader: R, mut writer: W, solution_id: Option<&str>) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(solution_id) = solution_id {
        let hello = Hello {
            solution_id: solution_id.to_string(),
        };
        send(&mut writer, &encode_line(&hello)?).await?;
    }

    let mut lines = reader.lines();
    let mut pilot = Pilot::new(Board::default());
    let mut answered = 0u64;

    while let Some(line) = lines.next_line().await? {
        let message: Message = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unreadable message: {}", e);
                continue;
            }
        };

        match message.kind {
            MessageKind::StartGame => {
                pilot = Pilot::new(Board::from_params(&message.params));
                info!("Match started on {:?}", pilot.board());
            }
            MessageKind::Tick => {
                let intent = pilot.decide(&message.params);
                let reply = CommandReply {
                    command: Some(intent),
                    debug: message
                        .params
                        .get("tick_num")
                        .map(|tick| format!("tick {}", tick)),
                };
                send(&mut writer, &encode_line(&reply)?).await?;
                answered += 1;
                debug!("Answered {}", intent);
            }
            MessageKind::EndGame => {
                info!("Match over after {} ticks", answered);
                break;
            }
        }
    }

    Ok(answered)
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Connects to a runner port and plays as `solution_id`
pub async fn play_tcp(addr: &str, solution_id: &str) -> io::Result<u64> {
    let stream = TcpStream::connect(addr).await?;
    info!("Connected to {}", addr);
    let (read_half, write_half) = stream.into_split();
    play(tokio::io::BufReader::new(read_half), write_half, Some(solution_id)).await
}

/// Plays over the process streams
pub async fn play_stdio() -> io::Result<u64> {
    play(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        None,
    )
    .await
}
