use docopt::Docopt;
use gridsim::{Config, LineLogger, Platform, Simulator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::Deserialize;
use slog::{o, Drain, Logger};
use std::error::Error;
use std::time::Instant;

const USAGE: &str = "
Gridsim simulation kernel driver.

Usage:
    gridsim --platform FILE (--flows FILE | --load LOAD --duration T) [--cfg KV]... [--seed SEED] [--verbose]
    gridsim --help

Options:
    -h, --help            Show this message.

    -p, --platform FILE   Platform file: host/link/route declarations, space-delimited.
    -f, --flows FILE      Flow file: src dst size_bytes start_time, space-delimited.

    --load LOAD           Synthesize flows at LOAD flows/sec instead of reading a file.
    --duration T          How long (virtual seconds) to generate flows for.

    --cfg KV              Configuration entry, KEY:VALUE. Repeatable.
    --seed SEED           Workload generation seed [default: 42].
    -v, --verbose         Log the kernel's progress to stderr.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_help: bool,

    flag_platform: String,
    flag_flows: Option<String>,

    flag_load: Option<f64>,
    flag_duration: Option<f64>,

    flag_cfg: Vec<String>,
    flag_seed: u64,
    flag_verbose: bool,
}

/// One flow to inject: (src host, dst host, size in bytes, start date).
type FlowDesc = (String, String, f64, f64);

fn main() {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if args.flag_help {
        print!("{}", USAGE);
        return;
    }

    match run_config(args) {
        Ok(failures) if failures == 0 => {}
        Ok(failures) => {
            eprintln!("{} actor(s) ended in error", failures);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn run_config(args: Args) -> Result<usize, Box<dyn Error>> {
    let mut config = Config::new();
    config.set_all(args.flag_cfg.iter().map(|s| s.as_str()))?;
    if config.context_nthreads == 0 {
        // 0 means "use the machine"
        config.context_nthreads = num_cpus::get();
    }

    eprintln!("Setup...");
    eprintln!("  Reading platform...");
    let platform = read_platform(&args.flag_platform)?;
    eprintln!("    {} hosts", platform.host_count());

    let flows = match &args.flag_flows {
        Some(path) => read_flows(path)?,
        None => {
            let load = args.flag_load.unwrap();
            let duration = args.flag_duration.unwrap();
            synthesize_flows(&platform, load, duration, args.flag_seed)
        }
    };
    eprintln!("  Init {} flows...", flows.len());

    let mut sim = Simulator::new(config, platform);
    if args.flag_verbose {
        let drain = LineLogger::new(std::io::stderr()).fuse();
        sim.set_logger(Logger::root(drain, o!()));
    }

    // csv header, cheating but that's okay here...
    println!("src,dst,size_byte,start,end");

    for (flow_id, (src_name, dst_name, size, start)) in flows.into_iter().enumerate() {
        let src = sim
            .host_of(&src_name)
            .ok_or_else(|| format!("unknown host '{}'", src_name))?;
        let dst = sim
            .host_of(&dst_name)
            .ok_or_else(|| format!("unknown host '{}'", dst_name))?;

        let mailbox = format!("flow-{}", flow_id);

        let send_mailbox = mailbox.clone();
        sim.register(&format!("sender-{}", flow_id), src, move |h| {
            if start > 0.0 {
                h.sleep(start)?;
            }
            let rdv = h.rdv_create(Some(&send_mailbox));
            h.send(rdv, size, Vec::new())
        });

        let src_label = src_name.clone();
        let dst_label = dst_name.clone();
        sim.register(&format!("receiver-{}", flow_id), dst, move |h| {
            let rdv = h.rdv_create(Some(&mailbox));
            h.recv(rdv)?;
            println!(
                "{},{},{},{},{}",
                src_label,
                dst_label,
                size,
                start,
                h.now()
            );
            Ok(())
        });
    }

    eprintln!("Running...");
    let wall_start = Instant::now();
    sim.run()?;
    let wall = wall_start.elapsed();
    eprintln!(
        "= simulated {:.6}s of virtual time in {:.3}s",
        sim.clock(),
        wall.as_secs_f64()
    );
    eprintln!("done");

    Ok(sim.failure_count())
}

/// Loads `host NAME SPEED`, `link NAME BANDWIDTH LATENCY [fatpipe]` and
/// `route SRC DST LINK...` declarations.
fn read_platform(path: &str) -> Result<Platform, Box<dyn Error>> {
    let mut platform = Platform::new();

    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .flexible(true)
        .from_path(path)?;

    for try_line in rdr.into_records() {
        let line = try_line?;
        match &line[0] {
            "host" => {
                platform.add_host(&line[1], line[2].parse()?);
            }
            "link" => {
                let link = platform.add_link(&line[1], line[2].parse()?, line[3].parse()?);
                if line.len() > 4 && &line[4] == "fatpipe" {
                    platform.set_link_policy(link, gridsim::SharingPolicy::Fatpipe);
                }
            }
            "route" => {
                let src = platform
                    .host_by_name(&line[1])
                    .ok_or_else(|| format!("unknown host '{}'", &line[1]))?;
                let dst = platform
                    .host_by_name(&line[2])
                    .ok_or_else(|| format!("unknown host '{}'", &line[2]))?;
                let mut links = Vec::new();
                for ix in 3..line.len() {
                    links.push(
                        platform
                            .link_by_name(&line[ix])
                            .ok_or_else(|| format!("unknown link '{}'", &line[ix]))?,
                    );
                }
                platform.add_route_symmetric(src, dst, links);
            }
            other => return Err(format!("unknown declaration '{}'", other).into()),
        }
    }

    Ok(platform)
}

fn read_flows(path: &str) -> Result<Vec<FlowDesc>, Box<dyn Error>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_path(path)?;

    let mut flows = Vec::new();
    for try_line in rdr.into_records() {
        let line = try_line?;
        flows.push((
            line[0].to_string(),
            line[1].to_string(),
            line[2].parse()?,
            line[3].parse()?,
        ));
    }
    Ok(flows)
}

/// Poisson flow arrivals between random host pairs.
fn synthesize_flows(platform: &Platform, load: f64, duration: f64, seed: u64) -> Vec<FlowDesc> {
    let mut rng = StdRng::seed_from_u64(seed);
    let inter_arrival = Exp::new(load).expect("load must be positive");
    let n_hosts = platform.host_count();
    assert!(n_hosts >= 2, "need at least two hosts to generate flows");

    let mut flows = Vec::new();
    let mut clock = 0.0;
    loop {
        clock += inter_arrival.sample(&mut rng);
        if clock > duration {
            break;
        }
        let src = rng.gen_range(0, n_hosts);
        let mut dst = rng.gen_range(0, n_hosts - 1);
        if dst >= src {
            dst += 1;
        }
        let size = rng.gen_range(1e4, 1e7);
        flows.push((
            platform.host_name(platform.host_at(src)).to_string(),
            platform.host_name(platform.host_at(dst)).to_string(),
            size,
            clock,
        ));
    }
    flows
}
