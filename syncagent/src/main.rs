#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syncagent::run_cli().await
}
