fn main() {
    if let Err(err) = copilot_relay::cli::run_copilot_relay() {
        tracing::error!(error = %err, "copilot-relay failed");
        std::process::exit(1);
    }
}
