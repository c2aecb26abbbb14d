use assistant_orchestrator::config::Config;
use assistant_orchestrator::models::TurnOutcome;
use assistant_orchestrator::session::Session;
use std::io::{BufRead, Write};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    let session = Session::new(&config)?;

    println!("=== Task Router ===");
    println!("Type your message and I'll route it to the right agent.");
    println!("Type 'quit' to exit.\n");

    let stdin = std::io::stdin();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") {
            break;
        }

        match session.handle_message(input).await {
            Ok(TurnOutcome::Answered(reply)) => {
                println!("\n  Category  : {}", reply.category);
                println!("  Confidence: {}", reply.confidence);
                println!("  Reason    : {}", reply.reason);
                println!("  Mission   : {}\n", reply.mission);
                println!("  {}\n", reply.answer);
            }
            Ok(TurnOutcome::Unclassified { reason }) => {
                println!("\n  I don't know this subject well. ({})", reason);
                println!("  Please try again with a message about stocks or teaching.\n");
            }
            // Report and keep the loop alive; nothing was persisted for
            // this turn
            Err(e) => {
                error!("Turn failed: {}", e);
                eprintln!("\n  Error: {}\n", e);
            }
        }
    }

    Ok(())
}
