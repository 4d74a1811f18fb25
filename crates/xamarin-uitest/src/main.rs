fn main() {
    if let Err(err) = xamarin_uitest::run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
