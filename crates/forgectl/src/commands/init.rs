use std::path::Path;

use forge_core::ForgeConfig;

pub fn run(config_path: &Path, base_dir: &Path, bucket: &str, project_id: &str) -> anyhow::Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    let config = ForgeConfig::scaffold(base_dir, bucket, project_id);
    std::fs::create_dir_all(config.clusters_dir())?;
    std::fs::write(config_path, config.to_toml_string()?)?;
    println!("✓ Generated {}", config_path.display());
    Ok(())
}
