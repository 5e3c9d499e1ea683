//! Validate a quest script without serving it.

use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: script_check <script-path>...");
        std::process::exit(2);
    }

    let mut failures = 0usize;
    for arg in &args[1..] {
        match quest::load_script(Path::new(arg)) {
            Ok(loaded) => {
                println!(
                    "{}: ok (title='{}', objects={}, players={})",
                    arg,
                    loaded.title,
                    loaded.objects.len(),
                    loaded.players.len()
                );
            }
            Err(err) => {
                eprintln!("{}", err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
