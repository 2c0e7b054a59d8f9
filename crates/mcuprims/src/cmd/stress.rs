use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::warn;

use crate::cmd::{open_link, StressArgs};
use crate::exit::{CliError, CliResult, FAILURE, HEALTH_CHECK_FAILED, SUCCESS, USAGE};
use crate::output::{print_dump, print_report, OutputFormat};

const STRESS_CMD: u32 = 0x0000_0051;

#[derive(Default)]
struct Tally {
    ok: usize,
    failures: usize,
    timeouts: usize,
}

#[derive(Serialize)]
struct StressOutput {
    schema_id: &'static str,
    threads: usize,
    total: usize,
    ok: usize,
    failures: usize,
    timeouts: usize,
    peak_concurrency: usize,
    elapsed_ms: f64,
}

pub fn run(args: StressArgs, format: OutputFormat) -> CliResult<i32> {
    if args.threads == 0 {
        return Err(CliError::new(USAGE, "--threads must be at least 1"));
    }
    let (mcu, handle) = open_link(&args.link)?;

    let start = Instant::now();
    let tallies: Vec<Tally> = thread::scope(|scope| {
        let workers: Vec<_> = (0..args.threads)
            .map(|worker| {
                let mcu = &mcu;
                let count = args.count;
                scope.spawn(move || {
                    let mut tally = Tally::default();
                    for i in 0..count {
                        let payload = stress_payload(worker, i);
                        match mcu.send_and_get_msg(STRESS_CMD, &payload, true) {
                            Ok(Some(reply)) if reply.data() == payload.as_slice() => {
                                tally.ok += 1;
                            }
                            Ok(_) => {
                                warn!(worker, i, "reply payload did not echo request");
                                tally.failures += 1;
                            }
                            Err(err) if err.is_timeout() => tally.timeouts += 1,
                            Err(err) => {
                                warn!(worker, i, error = %err, "stress command failed");
                                tally.failures += 1;
                            }
                        }
                    }
                    tally
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| Tally {
                    failures: args.count,
                    ..Tally::default()
                })
            })
            .collect()
    });
    let elapsed = start.elapsed();

    if args.link.dump {
        print_dump(&mcu.dump_debug_buf(), format);
    }

    let output = StressOutput {
        schema_id: "https://schemas.3leaps.dev/mcuprims/cli/v1/stress-result.schema.json",
        threads: args.threads,
        total: args.threads * args.count,
        ok: tallies.iter().map(|t| t.ok).sum(),
        failures: tallies.iter().map(|t| t.failures).sum(),
        timeouts: tallies.iter().map(|t| t.timeouts).sum(),
        peak_concurrency: handle.peak_concurrency(),
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    let rows = [
        ("threads", output.threads.to_string()),
        ("total", output.total.to_string()),
        ("ok", output.ok.to_string()),
        ("failures", output.failures.to_string()),
        ("timeouts", output.timeouts.to_string()),
        ("peak_concurrency", output.peak_concurrency.to_string()),
        ("elapsed_ms", output.elapsed_ms.to_string()),
    ];
    print_report(&output, &rows, &[], format);

    if output.peak_concurrency > 1 {
        return Ok(HEALTH_CHECK_FAILED);
    }
    if output.failures + output.timeouts > 0 {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn stress_payload(worker: usize, i: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9);
    payload.push(worker as u8);
    payload.extend_from_slice(&(i as u64).to_le_bytes());
    payload
}
