fn main() {
    if let Err(err) = conscious_tab_lib::run() {
        log::error!("conscious-tab exited with error: {err:?}");
        eprintln!("conscious-tab: {err:#}");
        std::process::exit(1);
    }
}
