use std::path::Path;

fn main() {
    match handle_cli_flags() {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }

    if let Err(err) = kudos_tui::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

const HELP: &str = "Kudos-TUI - Browse the kudos feed from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --check-env            Validate the site deployment environment and exit
  --upload <path>        Upload an image to the configured bucket and print its URL
  --delete <url>         Delete a previously uploaded image
  --set-token <token>    Save the site session cookie to the config file";

fn handle_cli_flags() -> anyhow::Result<bool> {
    let mut saw_flag = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Kudos-TUI {}", kudos_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            "--check-env" => {
                saw_flag = true;
                kudos_tui::app::check_env()?;
            }
            "--upload" => {
                saw_flag = true;
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--upload requires a file path"))?;
                kudos_tui::app::upload(Path::new(&path))?;
            }
            "--delete" => {
                saw_flag = true;
                let url = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--delete requires an object url"))?;
                kudos_tui::app::delete(&url)?;
            }
            "--set-token" => {
                saw_flag = true;
                let token = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--set-token requires a token"))?;
                kudos_tui::app::set_token(&token)?;
            }
            other if other.starts_with('-') => {
                anyhow::bail!("unknown flag {other}; see --help");
            }
            _ => {}
        }
    }
    Ok(saw_flag)
}
