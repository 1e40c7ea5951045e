#[tokio::main]
async fn main() -> eyre::Result<()> {
    docrelay::run().start().await
}
