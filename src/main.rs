fn main() {
    if let Err(err) = virt_backup::cli::run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
