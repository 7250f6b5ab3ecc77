use clap::Parser;
use jvm_loader::{layout::Layout, Type, Vm};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump the resolved layout of a class"
)]
struct Args {
    /// Class path to search, separated like PATH
    #[arg(short, long, value_name = "PATH")]
    class_path: String,
    /// Class to dump, in source form (e.g. java.lang.String)
    class_name: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match dump(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn dump(args: &Args) -> jvm_loader::Result<()> {
    let vm = Vm::builder().class_path(&args.class_path)?.build()?;
    let ty = vm
        .bootstrap()
        .load_class_from_source_name(&args.class_name, true, true)?
        .ok_or_else(|| jvm_loader::Error::ClassNotFound(args.class_name.clone()))?;

    println!("{} ({:?})", ty.name(), ty.state());
    if let Some(parent) = ty.parent()? {
        println!("  extends {}", parent.name());
    }
    for interface in ty.interfaces()? {
        println!("  implements {}", interface.name());
    }
    println!("  native name: {}", ty.native_name()?);

    if let Ok(class) = ty.as_class() {
        print_layout("Static fields", class.static_layout()?);
        print_layout("Instance fields", class.instance_layout()?);

        println!("\nMethods:");
        for method in class.declared_methods() {
            println!(
                "  - {}{} [{:?}]",
                method.name(),
                method.signature(),
                method.access()
            );
        }
    }
    print_vtable(&ty)?;
    Ok(())
}

fn print_layout(title: &str, layout: &Layout) {
    println!(
        "\n{title} (base {}, size {}, align {}):",
        layout.base(),
        layout.size(),
        layout.alignment()
    );
    for field in layout.fields() {
        let offset = field
            .offset()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "?".to_string());
        let hidden = if field.is_hidden() { " (hidden)" } else { "" };
        println!("  {offset:>4}: {} {}{hidden}", field.descriptor(), field.name());
    }
}

fn print_vtable(ty: &Type) -> jvm_loader::Result<()> {
    println!("\nVirtual table:");
    for (slot, method) in ty.vtable()?.iter().enumerate() {
        let owner = method
            .declaring_type()
            .map(|t| t.name().to_string())
            .unwrap_or_default();
        println!("  [{slot}] {owner}.{}{}", method.name(), method.signature());
    }
    Ok(())
}
