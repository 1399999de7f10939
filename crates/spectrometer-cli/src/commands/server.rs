use anyhow::{Context, Result};
use spectrometer_hw::{Config, Server};

fn server(config: &Config) -> Result<Server> {
    Server::from_config(config).context("Failed to prepare the server connection")
}

/// Flash the FPGA of the Red Pitaya.
pub async fn flash_fpga(config: &Config, model: Option<String>) -> Result<()> {
    let model = model.unwrap_or_else(|| config.server.red_pitaya_model.clone());
    println!(
        "Flashing FPGA of {} ({model})...",
        config.server.ip_address
    );
    server(config)?
        .flash_fpga(&model)
        .await
        .context("Flashing the FPGA failed")?;
    println!("✓ FPGA flashed");
    Ok(())
}

/// Build the MaRCoS server on the Red Pitaya.
pub async fn setup_server(config: &Config) -> Result<()> {
    println!("Setting up MaRCoS server on {}...", config.server.ip_address);
    server(config)?
        .setup()
        .await
        .context("Server setup failed")?;
    println!("✓ MaRCoS server built");
    println!("\nRun 'spectrometer start' to start it.");
    Ok(())
}

pub async fn start_server(config: &Config) -> Result<()> {
    server(config)?
        .start()
        .await
        .context("Failed to start the MaRCoS server")?;
    println!(
        "✓ MaRCoS server started on {}:{}",
        config.server.ip_address, config.server.port
    );
    Ok(())
}

pub async fn stop_server(config: &Config) -> Result<()> {
    server(config)?
        .stop()
        .await
        .context("Failed to stop the MaRCoS server")?;
    println!("✓ MaRCoS server stopped");
    Ok(())
}

/// Report whether the server process is running.
pub async fn server_status(config: &Config) -> Result<()> {
    let running = server(config)?
        .is_running()
        .await
        .context("Failed to query the MaRCoS server")?;
    if running {
        println!("✓ MaRCoS server is running on {}", config.server.ip_address);
    } else {
        println!("MaRCoS server is not running on {}", config.server.ip_address);
        println!("\nRun 'spectrometer start' to start it.");
    }
    Ok(())
}
