use angler::cli::{AnglerCli, load_env, run};
use clap::Parser;
use std::path::Path;

fn execute(cli: AnglerCli) -> anyhow::Result<()> {
    let env = load_env(Path::new(&cli.env))?;
    let output = run(cli.clone(), env)?;
    println!("{output}");
    Ok(())
}

#[cfg(not(test))]
fn main() -> anyhow::Result<()> {
    execute(AnglerCli::parse())
}

#[cfg(test)]
fn main() -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use angler::cli::Commands;
    use tempfile::tempdir;

    #[test]
    fn execute_reads_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "logging=off\n").unwrap();
        let cli = AnglerCli {
            env: env_path.to_string_lossy().into(),
            command: Some(Commands::Install),
            json: false,
        };
        execute(cli).unwrap();
        assert!(dir.path().join("queue").exists());
    }

    #[test]
    fn execute_handles_missing_env() {
        let dir = tempdir().unwrap();
        let cli = AnglerCli {
            env: dir.path().join("missing.env").to_string_lossy().into(),
            command: Some(Commands::Unlock),
            json: false,
        };
        execute(cli).unwrap();
    }

    #[test]
    fn stub_main_is_callable() {
        super::main().unwrap();
    }
}
