use std::fs::File;
use std::io::BufReader;

use clap::Parser;
use nettrace::{read_trace, PayloadValue};

/// Dumps the events of a Nettrace (.nettrace) file to stdout.
#[derive(Parser)]
struct Args {
    /// Path to the .nettrace file.
    path: String,

    /// Print each event's decoded payload fields.
    #[arg(long)]
    show_payloads: bool,

    /// Only print events from this provider.
    #[arg(long)]
    provider: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let file = File::open(&args.path).expect("failed to open trace file");
    let reader = BufReader::new(file);

    let mut progress_shown = 0u64;
    let trace = read_trace(
        reader,
        Some(&mut |consumed, total| {
            let pct = if total == 0 { 100 } else { consumed * 100 / total };
            if pct >= progress_shown + 10 {
                progress_shown = pct;
                eprintln!("{pct}% ({consumed}/{total} bytes)");
            }
        }),
    )
    .expect("failed to decode trace");

    println!(
        "process {} captured {:04}-{:02}-{:02} {:02}:{:02}:{:02}, {} processors, pointer size {}",
        trace.metadata.process_id,
        trace.metadata.date.year,
        trace.metadata.date.month,
        trace.metadata.date.day,
        trace.metadata.date.hour,
        trace.metadata.date.minute,
        trace.metadata.date.second,
        trace.metadata.number_of_processors,
        trace.metadata.pointer_size,
    );
    println!(
        "{} distinct event schemas, {} events, {} interned stacks",
        trace.event_metadata.len(),
        trace.events.len(),
        trace.stacks.len(),
    );

    for event in &trace.events {
        if let Some(provider) = &args.provider {
            if &event.metadata.provider_name != provider {
                continue;
            }
        }

        print!(
            "#{:<6} t={:<12} thread={:<8} {} / {}",
            event.index, event.timestamp, event.thread_id, event.metadata.provider_name, event.metadata.event_name,
        );

        if let Some(stack) = trace.stack_for(event) {
            print!(" [{} frames]", stack.frames.len());
        }
        println!();

        if args.show_payloads {
            for (name, value) in &event.payload_fields {
                println!("    {name} = {}", format_payload_value(value));
            }
        }
    }
}

fn format_payload_value(value: &PayloadValue) -> String {
    match value {
        PayloadValue::String(s) => s.clone(),
        PayloadValue::Array(items) => format!(
            "[{}]",
            items.iter().map(format_payload_value).collect::<Vec<_>>().join(", ")
        ),
        PayloadValue::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", format_payload_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => format!("{other:?}"),
    }
}
