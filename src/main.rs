fn main() {
    if let Err(e) = schemup::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
