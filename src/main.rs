fn main() {
    if let Err(err) = cardocs::cli::run() {
        cardocs::ui::eprintln_error(&err);
        std::process::exit(cardocs::exit::exit_code(&err));
    }
}
