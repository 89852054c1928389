use simulation::run_simulation;
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())?;
    Ok(())
}

async fn async_main() -> basalt_sdk::Result<()> {
    let seed = std::env::var("BASALT_SEED")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(42);

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            BASALT REBASE SIMULATIONS (seed {:>5})          ║", seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    // Run 1: two devices, small log
    let stats = run_simulation(2, 50, 200, seed).await?;
    stats.print();

    // Run 2: a handful of devices
    let stats = run_simulation(4, 200, 1000, seed).await?;
    stats.print();

    // Run 3: many devices, frequent maintenance
    let stats = run_simulation(10, 100, 2000, seed).await?;
    stats.print();

    println!("\n✓ All simulations completed successfully!");
    Ok(())
}
