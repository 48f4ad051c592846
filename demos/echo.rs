use async_io::Async;
use async_ws_session::session::{WsSession, WsSessionConfig};
use async_ws_session::{WsError, WsMessageType};
use futures::executor::block_on;
use futures::future::join;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

type Tcp = Async<TcpStream>;

async fn echo(server: WsSession<Tcp>) -> Result<(), WsError> {
    let token = CancellationToken::new();
    let mut message = Vec::new();
    loop {
        let mut buffer = [0u8; 1024];
        let result = server.receive(&mut buffer, &token).await?;
        if result.message_type == WsMessageType::Close {
            log::info!("client closed: {:?}", server.close_status());
            return server.close(1000, "", &token).await;
        }
        message.extend_from_slice(&buffer[..result.count]);
        if result.end_of_message {
            server
                .send(&message, result.message_type, true, &token)
                .await?;
            message.clear();
        }
    }
}

async fn chat(client: WsSession<Tcp>) -> Result<(), WsError> {
    let token = CancellationToken::new();
    for line in ["hello", "echo", "bye"] {
        client
            .send(line.as_bytes(), WsMessageType::Text, true, &token)
            .await?;
        let mut buffer = [0u8; 1024];
        let result = client.receive(&mut buffer, &token).await?;
        log::info!(
            "echoed: {}",
            String::from_utf8_lossy(&buffer[..result.count])
        );
    }
    client.close(1000, "done", &token).await?;
    log::info!("client session {}", client.state());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    block_on(async {
        let listener = Async::<TcpListener>::bind((Ipv4Addr::LOCALHOST, 0))?;
        let addr = listener.get_ref().local_addr()?;
        let (accepted, connected) =
            join(listener.accept(), Async::<TcpStream>::connect(addr)).await;
        let server = WsSession::with_config(accepted?.0, WsSessionConfig::server())?;
        let client = WsSession::with_config(connected?, WsSessionConfig::client())?;
        let (served, chatted) = join(echo(server), chat(client)).await;
        served?;
        chatted?;
        Ok::<(), anyhow::Error>(())
    })
}
