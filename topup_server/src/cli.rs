use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 17] = [
        "RUST_LOG",
        "TOPUP_HOST",
        "TOPUP_PORT",
        "TOPUP_DATABASE_URL",
        "TOPUP_SIGNATURE_HEADER",
        "TOPUP_ACK_DEAD_LETTERS",
        "TOPUP_MAX_RETRIES",
        "TOPUP_RETRY_BASE_MS",
        "TOPUP_LOCK_TTL_MS",
        "TOPUP_LOCK_WAIT_MS",
        "TOPUP_MAX_TOPUP_CENTS",
        "TOPUP_PENDING_CHARGE_TIMEOUT_MINS",
        "TOPUP_RECONCILE_INTERVAL_MINS",
        "TOPUP_RECONCILE_DAYS_BACK",
        "TOPUP_GATEWAY_URL",
        "TOPUP_CALLBACK_URL",
        "TOPUP_REDIS_URL",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
