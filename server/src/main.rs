#[tokio::main]
async fn main() {
    workspace_server::app::run().await;
}
