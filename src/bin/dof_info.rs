use dof_rs::layout::DofLayout;
use dof_rs::numbering::{distribute_dofs, DofOrdering};
use dof_rs::utilities::{parse_index_list, read_json_file};
use dof_rs::{DofIdType, DofObject, ProcessorIdType};

use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
#[structopt(name = "dof_info", rename_all = "verbatim")]
struct Opt {
    /// JSON layout file (see `make_layout_file`)
    #[structopt(long = "config", conflicts_with = "buffer")]
    config_path: Option<String>,
    /// Packed buffer, e.g. "2,8,257,0,257,96,257,192,257,0"
    #[structopt(long)]
    buffer: Option<String>,
    /// Number of entities sharing the layout
    #[structopt(long, default_value = "1")]
    n_entities: usize,
    /// Number the DOFs of `system` over all entities before querying
    #[structopt(long)]
    number: bool,
    /// Number variable-major instead of node-major
    #[structopt(long)]
    var_major: bool,
    #[structopt(long, default_value = "0")]
    first_dof: DofIdType,
    #[structopt(long, default_value = "0")]
    system: usize,
    /// Processor id assigned to every entity
    #[structopt(long, default_value = "0")]
    rank: ProcessorIdType,
    /// DOF queries as "var,comp"; may be repeated
    #[structopt(long = "query")]
    queries: Vec<String>,
    /// Print the packed buffer of every entity
    #[structopt(long)]
    print_buffer: bool,
}

fn template(opt: &Opt) -> Result<DofObject> {
    let mut obj = DofObject::new();
    match (&opt.config_path, &opt.buffer) {
        (Some(path), _) => {
            let layout: DofLayout = read_json_file(path)?;
            layout.apply(&mut obj)?;
        }
        (None, Some(buffer)) => obj.set_buffer(parse_index_list(buffer)?)?,
        (None, None) => DofLayout::default().apply(&mut obj)?,
    }
    Ok(obj)
}

fn query(obj: &DofObject, s: usize, query: &str) -> Result<DofIdType> {
    let (var, comp) = match parse_index_list::<usize>(query)?.as_slice() {
        &[var, comp] => (var, comp),
        _ => return Err(format!("query `{}` is not of the form var,comp", query).into()),
    };

    if var >= obj.n_vars(s) {
        return Err(format!("variable {} out of range ({} variables)", var, obj.n_vars(s)).into());
    }
    if comp >= obj.n_comp(s, var) {
        return Err(format!(
            "component {} out of range ({} components)",
            comp,
            obj.n_comp(s, var)
        )
        .into());
    }

    Ok(obj.dof_number(s, var, comp))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let template = template(&opt)?;
    if opt.system >= template.n_systems() {
        return Err(format!(
            "system {} out of range ({} systems)",
            opt.system,
            template.n_systems()
        )
        .into());
    }

    let mut objects: Vec<_> = (0..opt.n_entities)
        .map(|i| {
            let mut obj = template.clone();
            obj.set_id(i as DofIdType);
            obj.set_processor_id(opt.rank);
            obj
        })
        .collect();

    if opt.number {
        let ordering = if opt.var_major {
            DofOrdering::VarMajor
        } else {
            DofOrdering::NodeMajor
        };
        let end = distribute_dofs(&mut objects, opt.system, opt.first_dof, ordering);
        info!(n_dofs = end - opt.first_dof, "numbered {} entities", objects.len());
    }

    for obj in &objects {
        print!("{}", obj);
        if opt.print_buffer {
            println!("  buffer: {:?}", obj.buffer());
        }
        for q in &opt.queries {
            println!("  dof_number({}, {}) = {}", opt.system, q, query(obj, opt.system, q)?);
        }
    }

    Ok(())
}
