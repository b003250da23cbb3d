use std::path::PathBuf;

use anyhow::{bail, Context};

use tabwire_core::{Config, Paths};

pub fn show(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = match &config_path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_or_default(&paths)?,
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_file = paths.config_file();
    if config_file.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_file.display()
        );
    }
    Config::default().save(&config_file)?;
    println!("Wrote {}", config_file.display());
    Ok(())
}
