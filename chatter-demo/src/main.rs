use chatter_core::io::{build_output_path, read_lines};
use chatter_core::{BrainConfig, GenerativeBrain, tokenizer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // One message per line
    let input = std::env::args().nth(1).unwrap_or_else(|| "./data/messages.txt".to_owned());

    // Two words of context, at most 20 words per message
    let config = BrainConfig {
        chain_length: 2,
        max_generated_length: 20,
        ..BrainConfig::default()
    };

    // Show how a message is split with the default delimiters
    let sample = "Hello there... how are you?!";
    println!("{:?} -> {:?}", sample, tokenizer::split(sample, &config.split_chars));

    let brain = GenerativeBrain::new(config)?;

    // Load the snapshot if it exists, otherwise learn the text file and save one
    let snapshot = build_output_path(&input, "bin")?;
    match brain.load_model(&snapshot) {
        Ok(()) => println!("Loaded {}", snapshot.display()),
        Err(_) => {
            let messages = read_lines(&input)?;
            brain.refill(&messages)?;
            brain.save_model(&snapshot)?;
            println!("Learned {} messages, saved {}", messages.len(), snapshot.display());
        }
    }

    // Generate 10 messages
    for i in 0..10 {
        println!("Generated message {}: {}", i + 1, brain.generate());
    }

    // Changing the context length needs the corpus again
    let update = brain.update_configuration(BrainConfig { chain_length: 1, ..brain.config() })?;
    println!("After shortening the context: {:?}, model is empty: {}", update, brain.snapshot().is_empty());

    // A zero context length is rejected
    match brain.update_configuration(BrainConfig { chain_length: 0, ..brain.config() }) {
        Ok(_) => println!("Should not happen"),
        Err(e) => println!("Rejected: {e}"),
    }

    Ok(())
}
