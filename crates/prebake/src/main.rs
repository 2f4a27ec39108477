fn main() {
    if let Err(err) = prebake::run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
