//! A tool to collect and aggregate GitHub activity metrics.

#[tokio::main]
async fn main() -> Result<(), ohno::AppError> {
    gh_metrics::run(std::env::args()).await
}
