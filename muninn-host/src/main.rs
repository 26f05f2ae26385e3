use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  muninn_host::run_stdio().context("run host message loop")
}

fn print_help() {
  println!("Muninn host v{}", env!("CARGO_PKG_VERSION"));
  println!("Reads JSON messages from stdin, one per line, and writes responses");
  println!("and badge/notification/overlay commands to stdout.");
  println!();
  println!("Requests (answered):");
  println!("  {{\"id\": 1, \"action\": \"getSettings\"}}");
  println!("  {{\"action\": \"saveSettings\", \"settings\": {{\"automaticScan\": false}}}}");
  println!("  {{\"action\": \"scanPage\", \"url\": \"...\", \"html\": \"...\", \"tabId\": 3}}");
  println!("  {{\"action\": \"getScanResults\", \"url\": \"...\"}}");
  println!("  {{\"action\": \"showEducation\", \"threatType\": \"phishing\"}}");
  println!("Events (not answered):");
  println!("  {{\"event\": \"tabUpdated\", \"tabId\": 3, \"url\": \"...\", \"status\": \"complete\"}}");
  println!("  {{\"event\": \"tabRemoved\", \"tabId\": 3}}");
  println!();
  println!("Environment:");
  println!("  MUNINN_HOME  base directory for config.toml, logs/ and storage/");
  println!("  RUST_LOG     overrides [logging] level");
}
