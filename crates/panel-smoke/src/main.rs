use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

use rusttune_core::{Command, Event};

#[tokio::main]
async fn main() {
    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let request_port: u16 = std::env::args()
        .nth(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(10002);
    let event_port: u16 = std::env::args()
        .nth(3)
        .and_then(|p| p.parse().ok())
        .unwrap_or(10003);

    eprintln!("Driving tuner at {host}:{request_port}, events on :{event_port}");
    let events = UdpSocket::bind(("0.0.0.0", event_port))
        .await
        .expect("event port bind failed");
    let request = UdpSocket::bind("0.0.0.0:0").await.expect("socket failed");

    for cmd in [Command::Wakeup, Command::Move { angle: 45 }, Command::Home] {
        let raw = cmd.encode().expect("encode failed");
        request
            .send_to(&raw, (host.as_str(), request_port))
            .await
            .expect("send failed");
        eprintln!("sent {}", cmd.kind());
    }

    // Print everything the unit says for a few seconds, then exit
    let mut buf = [0u8; 64];
    loop {
        match timeout(Duration::from_secs(5), events.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => match Event::decode(&buf[..len]) {
                Ok(Event::Heartbeat) => println!("heartbeat"),
                Ok(Event::TxProgress(angle)) => println!("tx @ {angle}"),
                Ok(Event::AntProgress(angle)) => println!("ant @ {angle}"),
                Err(e) => eprintln!("undecodable event: {e}"),
            },
            Ok(Err(e)) => {
                eprintln!("receive error: {e}");
                std::process::exit(2);
            }
            Err(_) => {
                eprintln!("no events for 5s, done");
                break;
            }
        }
    }
}
