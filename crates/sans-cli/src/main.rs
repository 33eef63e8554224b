fn main() {
    std::process::exit(sans_cli::cli::run_from_env());
}
