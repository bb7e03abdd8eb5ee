#[tokio::main]
async fn main() {
    if let Err(e) = atelier_lib::run().await {
        tracing::error!(error = %e, "Startup failed");
        eprintln!("atelier: {e}");
        std::process::exit(1);
    }
}
