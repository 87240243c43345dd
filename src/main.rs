#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpslink::boot::init_logging();
    let matches = gpslink::cli::parse_args();
    gpslink::cli::actions::run(&matches).await
}
