fn main() {
    if let Err(err) = geo_ingest::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
