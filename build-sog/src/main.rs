use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use anyhow::Context;
use glam::Vec3A;
use sog_lib::{GsplatArray, SogDecoder, SogEncoder, Tsplat, TsplatArray};

#[derive(Clone, Debug, Default)]
struct BuildSogOptions {
    info: bool,
    max_sh: Option<usize>,
    iterations: Option<usize>,
    output: Option<String>,
    skip_validate: bool,
}

fn open_reader(filename: &str) -> anyhow::Result<BufReader<File>> {
    let file = File::open(filename).with_context(|| format!("Failed to open {}", filename))?;
    Ok(BufReader::new(file))
}

fn count_invalid(splats: &GsplatArray) -> usize {
    let mut invalid_count = 0;
    for index in 0..splats.len() {
        let splat = splats.get(index);
        if !splat.is_finite() || !splats.sh_rest(index).iter().all(|v| v.is_finite()) {
            if invalid_count < 100 {
                eprintln!("Splat {} not finite: {:?}", index, splat);
            }
            invalid_count += 1;
        }
    }
    invalid_count
}

fn describe(splats: &GsplatArray, description: &mut serde_json::Map<String, serde_json::Value>) {
    let mut min = Vec3A::splat(f32::INFINITY);
    let mut max = Vec3A::splat(f32::NEG_INFINITY);
    let mut opacity_sum = 0.0f64;
    let mut max_scale = 0.0f32;
    for splat in splats.iter() {
        if splat.center.is_finite() {
            min = min.min(splat.center);
            max = max.max(splat.center);
        }
        opacity_sum += splat.opacity() as f64;
        if splat.max_scale().is_finite() {
            max_scale = max_scale.max(splat.max_scale());
        }
    }
    let to_json = |v: Vec3A| serde_json::json!([v.x, v.y, v.z]);
    if min.cmple(max).all() {
        description.insert("min_center".to_string(), to_json(min));
        description.insert("max_center".to_string(), to_json(max));
    }
    if !splats.is_empty() {
        description.insert("mean_opacity".to_string(), serde_json::json!(opacity_sum / splats.len() as f64));
        description.insert("max_scale".to_string(), serde_json::json!(max_scale));
    }
}

fn output_filename(filename: &str, options: &BuildSogOptions) -> String {
    if let Some(output) = options.output.as_ref() {
        return output.clone();
    }
    let mut output = filename.to_string();
    if let Some(dot) = filename.rfind('.') {
        output.replace_range(dot.., "-re.sog");
    } else {
        output.push_str("-re.sog");
    }
    output
}

fn process_file(filename: &str, options: &BuildSogOptions) -> anyhow::Result<()> {
    let decoder = SogDecoder::new();
    let meta = decoder.read_meta(open_reader(filename)?)?;

    let mut description = serde_json::Map::new();
    description.insert("generator".to_string(), serde_json::Value::String(meta.asset.generator.clone()));
    description.insert("antialias".to_string(), serde_json::Value::Bool(meta.antialias));
    if let Some(sh_n) = meta.sh_n.as_ref() {
        description.insert("sh_palette_size".to_string(), serde_json::Value::Number(sh_n.count.into()));
    }

    let start_time = std::time::Instant::now();
    let mut splats = decoder.decode(open_reader(filename)?, |s| println!("{}", s))?;
    let decode_duration = start_time.elapsed();

    let input_splat_count = splats.len();
    let input_sh_degree = splats.max_sh_degree();
    println!("Read: num_splats: {} with sh_degree: {}", input_splat_count, input_sh_degree);
    description.insert("input_splat_count".to_string(), serde_json::Value::Number(input_splat_count.into()));
    description.insert("input_sh_degree".to_string(), serde_json::Value::Number(input_sh_degree.into()));
    description.insert("decode_duration".to_string(), serde_json::json!(decode_duration.as_secs_f64()));
    describe(&splats, &mut description);

    if !options.skip_validate {
        let invalid_count = count_invalid(&splats);
        description.insert("invalid_splat_count".to_string(), serde_json::Value::Number(invalid_count.into()));
        if invalid_count > 0 {
            eprintln!("Found {} invalid splats", invalid_count);
            anyhow::bail!("Stopping processing due to invalid splats! To continue, use --skip-validate");
        }
    }

    if options.info {
        println!("{}", serde_json::to_string_pretty(&description)?);
        return Ok(());
    }

    if let Some(max_sh) = options.max_sh {
        splats.set_max_sh_degree(max_sh);
        description.insert("output_sh_degree".to_string(), serde_json::Value::Number(splats.max_sh_degree().into()));
    }

    let mut encoder = SogEncoder::new(&splats).with_antialias(meta.antialias);
    if let Some(iterations) = options.iterations {
        encoder = encoder.with_iterations(iterations);
    }

    let start_time = std::time::Instant::now();
    let bytes = encoder.encode(|s| println!("{}", s))?;
    description.insert("encode_duration".to_string(), serde_json::json!(start_time.elapsed().as_secs_f64()));

    let filename_ext = output_filename(filename, options);
    let mut writer = BufWriter::new(File::create(&filename_ext).with_context(|| format!("Failed to create {}", filename_ext))?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    println!("Wrote {} ({} bytes)", filename_ext, bytes.len());
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

fn show_usage_exit() -> ! {
    eprintln!("Usage: build-sog");
    eprintln!("  [--info]                  // Print container statistics without re-encoding");
    eprintln!("  [--max-sh=<max-sh>]       // Set maximum SH degree of the output (default 3)");
    eprintln!("  [--iterations=<n>]        // Set k-means iterations (default 10)");
    eprintln!("  [--output=<file.sog>]     // Output file name (single input only, default <name>-re.sog)");
    eprintln!("  [--skip-validate]         // Skip validation of decoded splats");
    eprintln!("  <file.sog> [...]          // Multiple input files allowed");
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut options = BuildSogOptions::default();
    let mut filenames = Vec::new();

    for arg in args {
        if arg == "--info" {
            options.info = true;
            println!("Using --info: Print statistics only");
            continue;
        }
        if let Some(rest) = arg.strip_prefix("--max-sh=") {
            match rest.parse::<usize>() {
                Ok(v) => {
                    println!("Using --max-sh={}", v.min(3));
                    options.max_sh = Some(v.min(3));
                }
                Err(_) => {
                    eprintln!("Invalid --max-sh value: {}", rest);
                    show_usage_exit();
                }
            }
            continue;
        }
        if let Some(rest) = arg.strip_prefix("--iterations=") {
            match rest.parse::<usize>() {
                Ok(v) => {
                    println!("Using --iterations={}", v);
                    options.iterations = Some(v);
                }
                Err(_) => {
                    eprintln!("Invalid --iterations value: {}", rest);
                    show_usage_exit();
                }
            }
            continue;
        }
        if let Some(rest) = arg.strip_prefix("--output=") {
            options.output = Some(rest.to_string());
            println!("Using --output={}", rest);
            continue;
        }
        if arg == "--skip-validate" {
            options.skip_validate = true;
            println!("Using --skip-validate: Skip validation of decoded splats");
            continue;
        }
        if arg.starts_with("--") {
            eprintln!("Unknown option: {}", arg);
            show_usage_exit();
        }
        filenames.push(arg);
    }

    if filenames.is_empty() {
        show_usage_exit();
    }
    if options.output.is_some() && filenames.len() > 1 {
        eprintln!("--output requires a single input file");
        show_usage_exit();
    }

    let mut failed = 0;
    for filename in filenames {
        println!("*** Processing: {}", filename);
        if let Err(error) = process_file(&filename, &options) {
            eprintln!("Processing {} failed: {:?}", filename, error);
            failed += 1;
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
}
