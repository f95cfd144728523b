fn main() {
    let code = tre_cli::run_from_env();
    std::process::exit(code);
}
