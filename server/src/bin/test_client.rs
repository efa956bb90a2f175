use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::Notice;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug)]
#[clap(about = "Connects to the game endpoint and prints the admission outcome")]
struct Args {
    /// Game endpoint URL
    #[clap(long, default_value = "ws://127.0.0.1:8080/game/")]
    url: String,
    /// Open a second connection from this host while the first is live
    #[clap(long)]
    duplicate: bool,
}

// Print every frame until the first notice or a close
async fn read_admission(label: &str, socket: &mut Socket) {
    loop {
        match timeout(Duration::from_secs(5), socket.next()).await {
            Ok(Some(Ok(Message::Binary(bytes)))) => match Notice::decode(&bytes) {
                Ok(notice) => {
                    println!("[{}] notice: {:?}", label, notice);
                    if let Notice::Admitted { .. } = notice {
                        return;
                    }
                }
                Err(e) => println!("[{}] undecodable frame: {}", label, e),
            },
            Ok(Some(Ok(Message::Close(frame)))) => {
                match frame {
                    Some(frame) => println!(
                        "[{}] closed: {} {}",
                        label,
                        u16::from(frame.code),
                        frame.reason.as_str()
                    ),
                    None => println!("[{}] closed", label),
                }
                return;
            }
            Ok(Some(Ok(other))) => println!("[{}] frame: {:?}", label, other),
            Ok(Some(Err(e))) => {
                println!("[{}] error: {}", label, e);
                return;
            }
            Ok(None) => {
                println!("[{}] stream ended", label);
                return;
            }
            Err(_) => {
                println!("[{}] no notice within 5s", label);
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut first, _) = connect_async(args.url.as_str()).await?;
    println!("Connected to {}", args.url);
    read_admission("first", &mut first).await;

    if args.duplicate {
        let (mut second, _) = connect_async(args.url.as_str()).await?;
        read_admission("second", &mut second).await;
    }

    first.send(Message::Binary(b"hello".to_vec().into())).await?;
    if let Ok(Some(Ok(echo))) = timeout(Duration::from_secs(1), first.next()).await {
        println!("[first] relayed: {:?}", echo);
    }

    first.close(None).await?;
    Ok(())
}
