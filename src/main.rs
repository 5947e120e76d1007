use std::fs::read_to_string;
use std::path::Path;

use accelplan::{ProblemSpec, SolverConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .ok_or("Usage: <program> <problem.yaml> [config.yaml]")?;
    let config = match args.next() {
        Some(config_path) => SolverConfig::from_file(Path::new(&config_path))?,
        None => SolverConfig::default(),
    };

    let buf = read_to_string(path)?;
    let spec: ProblemSpec = serde_yaml::from_str(&buf)?;
    let mut problem = spec.into_instance()?.with_config(&config);
    let solution = problem.solve()?;

    println!("{}", serde_yaml::to_string(solution)?);
    Ok(())
}
