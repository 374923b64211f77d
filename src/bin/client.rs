use rookery::client::{self, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Logs go to stderr so the chat rendering keeps stdout to itself.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let config = client::Config::default();
    let ui = client::terminal();
    let session = Session::connect(&config, ui).await?;
    session.run().await?;
    Ok(())
}
