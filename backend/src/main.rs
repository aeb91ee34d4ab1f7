use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(err) = storefront_backend::run().await {
        error!(error = ?err, "Backend exited with error");
        eprintln!("backend exited with error: {err:#}");
        std::process::exit(1);
    }
}
