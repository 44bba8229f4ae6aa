use clap::{Parser, ValueEnum};
use log::{LevelFilter, info};
use std::{fs, process};

use zscript::{
    BytecodeBuilder, Engine, FunctionPrototype, ObjectType, Ref, SerializeFlags, SerializeFormat,
    Value, Vm, VmCreateInfo, from_binary, to_binary,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serialized function prototype to run
    #[arg(required = false, help = "A binary prototype written by --emit-demo or a host")]
    file: Option<String>,

    /// Print the instructions instead of executing
    #[arg(long)]
    dump: bool,

    /// Rendering of the returned value
    #[arg(long, value_enum, default_value_t = Format::Plain)]
    format: Format,

    #[arg(long, default_value_t = zscript::DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Register stack capacity in values
    #[arg(long, default_value_t = zscript::DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// Run the built-in demo program
    #[arg(long)]
    demo: bool,

    /// Write the demo program as a binary prototype and exit
    #[arg(long, value_name = "PATH")]
    emit_demo: Option<String>,

    /// Raise the log level, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Plain,
    Quoted,
    Json,
    JsonCompact,
}

impl From<Format> for SerializeFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Plain => SerializeFormat::Plain,
            Format::Quoted => SerializeFormat::Quoted,
            Format::Json => SerializeFormat::Json,
            Format::JsonCompact => SerializeFormat::JsonCompact,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let engine = Engine::default();

    if let Some(path) = &cli.emit_demo {
        let demo = demo_program();
        let mut buffer = Vec::new();
        let written = Value::new_prototype(&engine, demo)
            .and_then(|proto| to_binary(&proto, &mut buffer, SerializeFlags::NONE));
        if let Err(err) = written {
            eprintln!("Error serializing demo: {err}");
            process::exit(1);
        }
        if let Err(err) = fs::write(path, &buffer) {
            eprintln!("Error writing '{path}': {err}");
            process::exit(1);
        }
        info!("wrote {} bytes to {path}", buffer.len());
        return;
    }

    let proto = match (&cli.file, cli.demo) {
        (Some(path), _) => load_prototype(&engine, path),
        (None, true) => match Ref::new(&engine, demo_program()) {
            Ok(proto) => proto,
            Err(err) => {
                eprintln!("Error creating demo: {err}");
                process::exit(1);
            }
        },
        (None, false) => {
            eprintln!("Nothing to run: pass a FILE or --demo");
            process::exit(2);
        }
    };

    if cli.dump {
        dump_prototype(&proto, 0);
        return;
    }

    let mut vm = match Vm::new(engine.clone(), VmCreateInfo {
        stack_size: cli.stack_size,
        max_call_depth: cli.max_call_depth,
    }) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Error creating VM: {err}");
            process::exit(1);
        }
    };

    let result = Value::new_closure(&engine, &proto, vm.root().clone())
        .and_then(|main| vm.call(&main, &[]));
    match result {
        Ok(value) => println!("{}", value.serialize(cli.format.into())),
        Err(err) => {
            eprintln!("Error executing {}: {err}", proto.name);
            if !vm.last_error().is_empty() {
                eprintln!("{}", vm.last_error());
            }
            process::exit(1);
        }
    }
}

fn load_prototype(engine: &Engine, path: &str) -> Ref<FunctionPrototype> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error reading file '{path}': {err}");
            process::exit(1);
        }
    };

    let mut offset = 0;
    match from_binary(engine, &bytes, &mut offset) {
        Ok(Value::FunctionPrototype(proto)) => proto,
        Ok(other) => {
            eprintln!("'{path}' holds a {}, not a function prototype", other.type_name());
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Error decoding '{path}': {err}");
            process::exit(1);
        }
    }
}

fn dump_prototype(proto: &FunctionPrototype, depth: usize) {
    let pad = "    ".repeat(depth);
    println!(
        "{pad}== {} ({} params, {} registers) ==",
        proto.name,
        proto.parameter_count(),
        proto.stack_size
    );
    for (i, literal) in proto.literals.iter().enumerate() {
        println!("{pad}  #{i} = {}", literal.serialize(SerializeFormat::Quoted));
    }
    for (i, instruction) in proto.instructions.iter().enumerate() {
        println!("{pad}{i:>4}  {instruction}");
    }
    for nested in &proto.functions {
        dump_prototype(nested, depth + 1);
    }
}

/// Sums 10..1 in a loop and returns `{ sum: 55, label: "total" }`.
fn demo_program() -> FunctionPrototype {
    let mut code = BytecodeBuilder::new();
    code.line(1);
    code.load_int(1, 0);
    code.load_int(2, 10);

    code.line(2);
    let top = code.current_index();
    let done = code.jump_if_zero(2);
    code.add_eq(1, 2);
    code.pincr(2, 2, false);
    code.jump_back(top);
    code.bind(done);

    code.line(3);
    code.new_obj(0, ObjectType::Table);
    code.load_small_string(3, "sum");
    code.new_slot(0, 3, 1);
    code.load_small_string(3, "label");
    code.load(4, 0);
    code.new_slot(0, 3, 4);
    code.ret(0);

    FunctionPrototype {
        name: "main".into(),
        source_name: "demo".into(),
        instructions: code.finish(),
        literals: vec![Value::string_view("total")],
        parameter_names: vec!["this".into()],
        stack_size: 5,
        ..Default::default()
    }
}
