//! Project initialization — `narrate init`.

use anyhow::Result;

pub async fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use narrate::init::init_project;

    let result = init_project(project_dir).await?;

    if result.created {
        println!(
            "Initialized narrate project at {}",
            result.narrate_dir.display()
        );
        println!();
        println!("Created:");
        println!("  .narrate/");
        println!("  ├── narrate.toml  # Configuration (add [[auth.tokens]] before serving)");
        println!("  └── narrate.db    # Incident store");
        println!();
        println!("Next steps:");
        println!("  1. Add access tokens to .narrate/narrate.toml");
        println!("  2. Run `narrate config validate`");
        println!("  3. Run `narrate serve`");
    } else {
        println!(
            "Narrate project already initialized at {}",
            result.narrate_dir.display()
        );
        if result.config_written {
            println!("Wrote missing narrate.toml.");
        }
    }
    if result.templates_seeded > 0 {
        println!("Registered {} default prompt templates.", result.templates_seeded);
    }

    Ok(())
}
