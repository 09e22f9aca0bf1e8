fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = reelgrid::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Reelgrid {}", reelgrid::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "Reelgrid - browse and export cursor-paginated media feeds.\n\n  --version, -V          Show version and exit\n  --help,    -h          Show this help message\n  --collection KIND      videos (default) or images\n  --page N               Page to show (zero-based)\n  --last                 Jump to the final page\n  --oldest-first         Reverse the display ordering\n  --export FILE.zip      Download the shown page into an archive"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
