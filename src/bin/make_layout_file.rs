use dof_rs::layout::DofLayout;
use dof_rs::utilities::{dump_default_to_json_file, parse_index_list, read_json_file};
use dof_rs::DofObject;

use std::fs;
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
#[structopt(name = "make_layout_file", rename_all = "verbatim")]
struct Opt {
    /// Output layout file
    #[structopt(long = "output")]
    output_path: String,
    /// Convert this packed buffer instead of writing the default layout
    #[structopt(long, conflicts_with = "base_config_path")]
    buffer: Option<String>,
    /// Copy this layout, replacing the component count of every group
    #[structopt(long = "base_config", requires = "n_comp")]
    base_config_path: Option<String>,
    #[structopt(long)]
    n_comp: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let layout = match (&opt.buffer, &opt.base_config_path, opt.n_comp) {
        (Some(buffer), _, _) => {
            let mut obj = DofObject::new();
            obj.set_buffer(parse_index_list(buffer)?)?;
            DofLayout::from_object(&obj)
        }
        (None, Some(path), Some(n_comp)) => {
            let mut layout: DofLayout = read_json_file(path)?;
            for group in layout.systems.iter_mut().flat_map(|s| s.groups.iter_mut()) {
                group.n_comp = n_comp;
                group.dof_base = None;
            }
            layout
        }
        _ => {
            dump_default_to_json_file::<DofLayout>(&opt.output_path)?;
            info!(path = %opt.output_path, "wrote default layout");
            return Ok(());
        }
    };

    layout.validate()?;
    let file = std::io::BufWriter::new(fs::File::create(&opt.output_path)?);
    serde_json::to_writer_pretty(file, &layout)?;
    info!(path = %opt.output_path, n_systems = layout.systems.len(), "wrote layout");

    Ok(())
}
