//! gltf-res - Tool for inspecting and repacking glTF binary resources.

use std::collections::BTreeSet;
use std::env;
use std::path::Path;

use gltf_resources::buffer::BufferSource;
use gltf_resources::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    match filtered_args[0] {
        // Info command - show table summary
        "info" | "i" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: gltf-res info <file>");
                std::process::exit(1);
            }
            cmd_info(filtered_args[1]);
        }

        // Accessor command - dump one accessor
        "accessor" | "a" => {
            if filtered_args.len() < 3 {
                eprintln!("Error: missing arguments");
                eprintln!("Usage: gltf-res accessor <file> <index> [limit]");
                std::process::exit(1);
            }
            let index = parse_index(filtered_args[2]);
            let limit = filtered_args.get(3).map(|s| parse_index(s)).unwrap_or(8);
            cmd_accessor(filtered_args[1], index, limit);
        }

        // Repack command - rewrite, optionally dropping accessor data
        "repack" | "r" => {
            if filtered_args.len() < 3 {
                eprintln!("Error: missing arguments");
                eprintln!("Usage: gltf-res repack <in> <out> [--strip i,j,...] [--embed]");
                std::process::exit(1);
            }
            let embed = filtered_args.iter().any(|&s| s == "--embed" || s == "-e");
            let strip: BTreeSet<usize> = filtered_args
                .iter()
                .position(|&s| s == "--strip" || s == "-s")
                .and_then(|i| filtered_args.get(i + 1))
                .map(|list| list.split(',').map(parse_index).collect())
                .unwrap_or_default();
            cmd_repack(filtered_args[1], filtered_args[2], &strip, embed);
        }

        // Help
        "help" | "h" | "-h" | "--help" => print_help(),

        // Default: if file exists, show info; otherwise error
        _ => {
            if Path::new(filtered_args[0]).exists() {
                cmd_info(filtered_args[0]);
            } else {
                eprintln!("Unknown command: {}", filtered_args[0]);
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("gltf-res - glTF binary resource toolkit");
    println!();
    println!("USAGE:");
    println!("    gltf-res [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info     <file>                  Show buffers, views, accessors and meshes");
    println!("    a, accessor <file> <index> [limit]  Dump the first elements of an accessor");
    println!("    r, repack   <in> <out> [flags]      Rewrite the asset in its own format");
    println!("    h, help                             Show this help");
    println!();
    println!("REPACK FLAGS:");
    println!("    -s, --strip i,j,...   Drop the data of these accessors and compact buffers");
    println!("    -e, --embed           Store rewritten buffers as data URIs");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("NOTES:");
    println!("    - Passing a file directly is equivalent to 'info'");
    println!("    - RUST_LOG overrides the verbosity flags");
    println!("    - Rewritten external buffers are written next to <out>");
}

fn parse_index(s: &str) -> usize {
    match s.trim().parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Error: '{}' is not an index", s);
            std::process::exit(1);
        }
    }
}

fn open_or_exit(path: &str) -> Asset {
    tracing::info!("Opening {}", path);
    match Asset::open(path, &LoadOptions::default()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn cmd_info(path: &str) {
    let asset = open_or_exit(path);
    let doc = asset.document();

    println!("Asset: {}", path);
    println!("Format: {}", if asset.is_container() { "GLB container" } else { "JSON" });
    if !doc.extensions_used.is_empty() {
        println!("Extensions used: {}", doc.extensions_used.join(", "));
    }
    println!();

    println!("Buffers ({}):", doc.buffers.len());
    for (i, buffer) in doc.buffers.iter().enumerate() {
        let source = match asset.store().source(i, buffer) {
            Ok(BufferSource::Embedded) => "embedded".to_string(),
            Ok(BufferSource::External(p)) => p.display().to_string(),
            Ok(BufferSource::Container) => "BIN chunk".to_string(),
            Err(e) => format!("unresolvable: {}", e),
        };
        let actual = asset.buffers().get(i).map_or(0, |b| b.len());
        println!("  [{}] {} bytes (declared {}) - {}", i, actual, buffer.byte_length, source);
    }
    println!();

    println!("Buffer views: {}", doc.buffer_views.len());
    let sparse = doc.accessors.iter().filter(|a| a.sparse.is_some()).count();
    println!("Accessors: {} ({} sparse)", doc.accessors.len(), sparse);
    println!();

    let builder = asset.builder(BuildOptions::default());
    println!("Meshes ({}):", doc.meshes.len());
    for (m, mesh) in doc.meshes.iter().enumerate() {
        let name = mesh.name.as_deref().unwrap_or("<unnamed>");
        println!("  [{}] {} - {} primitives", m, name, mesh.primitives.len());
        let built = match builder.build_mesh(m) {
            Ok(b) => b,
            Err(e) => {
                println!("      error: {}", e);
                continue;
            }
        };
        for (p, prim) in built.into_iter().enumerate() {
            let source = &mesh.primitives[p];
            if let Some(block) = source.compressed() {
                println!("      ({}) compressed, view {}", p, block.buffer_view);
                continue;
            }
            match prim {
                Ok(prim) => {
                    let attrs: Vec<String> = prim
                        .attributes
                        .iter()
                        .map(|a| format!("{} {}[{}]x{}", a.name, a.component_type, a.component_count, a.element_count))
                        .collect();
                    let indices = prim.indices.as_ref().map_or(0, |i| i.element_count);
                    println!("      ({}) {} indices, {}", p, indices, attrs.join(", "));
                }
                Err(e) => println!("      ({}) error: {}", p, e),
            }
        }
    }
    tracing::debug!(
        buffers = builder.cached_buffers(),
        primitives = builder.cached_primitives(),
        "built"
    );
}

fn cmd_accessor(path: &str, index: usize, limit: usize) {
    let asset = open_or_exit(path);
    let table = asset.accessors();

    let accessor = match table.get(index) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    println!("Accessor {}: {} x {}", index, accessor.layout(), accessor.count);
    if let Some(name) = &accessor.name {
        println!("Name: {}", name);
    }
    match accessor.buffer_view {
        Some(v) => println!("View: {} at offset {}", v, accessor.offset()),
        None => println!("View: none (zero-filled)"),
    }
    if let Some(sparse) = &accessor.sparse {
        println!("Sparse: {} overrides", sparse.count);
    }

    let values: Vec<String> = match accessor.component_type {
        ComponentType::Float => match table.read::<f32>(index) {
            Ok(v) => v.iter().map(|x| format!("{:.4}", x)).collect(),
            Err(e) => fail(e),
        },
        _ => match table.materialize(index) {
            Ok(bytes) => widen(&bytes, accessor.component_type),
            Err(e) => fail(e),
        },
    };

    let per = accessor.layout().component_count();
    for (i, element) in values.chunks(per).take(limit).enumerate() {
        println!("  [{}] {}", i, element.join(" "));
    }
    if (accessor.count as usize) > limit {
        println!("  ... {} more", accessor.count as usize - limit);
    }
}

fn widen(bytes: &[u8], ct: ComponentType) -> Vec<String> {
    bytes
        .chunks_exact(ct.num_bytes())
        .map(|c| match ct {
            ComponentType::Byte => (c[0] as i8).to_string(),
            ComponentType::UnsignedByte => c[0].to_string(),
            ComponentType::Short => i16::from_le_bytes([c[0], c[1]]).to_string(),
            ComponentType::UnsignedShort => u16::from_le_bytes([c[0], c[1]]).to_string(),
            _ => u32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string(),
        })
        .collect()
}

fn fail(e: Error) -> ! {
    eprintln!("{}", e);
    std::process::exit(1);
}

fn cmd_repack(input: &str, output: &str, strip: &BTreeSet<usize>, embed: bool) {
    let mut asset = open_or_exit(input);

    // Files referenced by the output must exist next to it
    let mut options = CompactOptions::default();
    if embed {
        options = options.with_embedding(Embedding::All);
    }
    let dir = Path::new(output).parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    options = options.with_destination(dir);
    let report = match asset.compact(strip, &options) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Compaction failed: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Removed {} views, {} buffers, {} bytes",
        report.removed_buffer_views.len(),
        report.removed_buffers.len(),
        report.total_bytes_removed()
    );
    for file in &report.written_files {
        println!("  wrote {}", file.display());
    }
    for e in &report.errors {
        eprintln!("  warning: {}", e);
    }

    if let Err(e) = asset.save(output) {
        eprintln!("Failed to write {}: {}", output, e);
        std::process::exit(1);
    }
    println!("Wrote {}", output);
}
