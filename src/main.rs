fn main() {
    if let Err(e) = shopfront_pos_lib::run() {
        eprintln!("shopfront-pos: {e:#}");
        std::process::exit(1);
    }
}
