#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = courier::find_config_file()?;
    let courier = courier::Courier::load(&config_path)?;

    courier.run().await
}
