use anyhow::{anyhow, bail, Context, Result};
use datagrid::config::config::ViewConfig;
use datagrid::data::data_view::{DataView, DrawOutcome};
use datagrid::data::datatable::ColumnSet;
use datagrid::data::loaders::load_file;
use datagrid::data::pagination::PageAction;
use datagrid::data::sort_engine::{SortKey, SortOrder};
use datagrid::table_display::TableBridge;
use datagrid::utils::logging::init_tracing;
use tracing::{debug, warn};

const SHOWN_LOG_ENTRIES: usize = 200;

fn print_help() {
    println!("datagrid - filter, sort and page through CSV/JSON tables");
    println!();
    println!("Usage: datagrid FILE [options]");
    println!();
    println!("Options:");
    println!("  --filter TERM            Search every searchable column");
    println!("  --column-filter COL=TERM Search one column (name or index)");
    println!("  --regex                  Treat search terms as regular expressions");
    println!("  --exact                  Split nothing; match the whole term");
    println!("  --sort COL[:asc|desc]    Sort key, repeat for more keys");
    println!("  --page-length N          Rows per page, -1 for all");
    println!("  --page N                 Page to show, starting at 1");
    println!("  --hide COL               Hide a column, repeatable");
    println!("  --config PATH            Use a config file other than the default");
    println!("  --init-config            Write a commented config file and exit");
    println!("  --verbose                Echo logs to stderr");
    println!("  --show-log               Print the recent log to stderr when done");
    println!("  --help                   Show this help");
}

#[derive(Debug, Default)]
struct CliArgs {
    file: Option<String>,
    filter: Option<String>,
    column_filters: Vec<(String, String)>,
    regex: bool,
    exact: bool,
    sort: Vec<(String, SortOrder)>,
    page_length: Option<i64>,
    page: Option<usize>,
    hide: Vec<String>,
    config: Option<String>,
    init_config: bool,
    verbose: bool,
    show_log: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter();

    fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String> {
        iter.next()
            .cloned()
            .ok_or_else(|| anyhow!("{} needs a value", flag))
    }

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--filter" => parsed.filter = Some(value(&mut iter, arg)?),
            "--column-filter" => {
                let spec = value(&mut iter, arg)?;
                let (column, term) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--column-filter expects COL=TERM, got '{}'", spec))?;
                parsed.column_filters.push((column.to_string(), term.to_string()));
            }
            "--regex" => parsed.regex = true,
            "--exact" => parsed.exact = true,
            "--sort" => {
                let spec = value(&mut iter, arg)?;
                parsed.sort.push(parse_sort_key(&spec));
            }
            "--page-length" => {
                parsed.page_length = Some(
                    value(&mut iter, arg)?
                        .parse()
                        .context("--page-length expects a number")?,
                )
            }
            "--page" => {
                let page: usize = value(&mut iter, arg)?
                    .parse()
                    .context("--page expects a number")?;
                parsed.page = Some(page.max(1));
            }
            "--hide" => parsed.hide.push(value(&mut iter, arg)?),
            "--config" => parsed.config = Some(value(&mut iter, arg)?),
            "--init-config" => parsed.init_config = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--show-log" => parsed.show_log = true,
            "--help" | "-h" => parsed.help = true,
            other if other.starts_with("--") => bail!("Unknown option {}", other),
            file => {
                if parsed.file.replace(file.to_string()).is_some() {
                    bail!("Only one data file can be given");
                }
            }
        }
    }
    Ok(parsed)
}

/// `COL[:asc|desc]`. A suffix that is not a direction stays part of the name.
fn parse_sort_key(spec: &str) -> (String, SortOrder) {
    spec.rsplit_once(':')
        .and_then(|(column, suffix)| Some((column.to_string(), suffix.parse().ok()?)))
        .unwrap_or_else(|| (spec.to_string(), SortOrder::Ascending))
}

/// Resolve a column given by name or by index
fn resolve_column(columns: &ColumnSet, name: &str) -> Result<usize> {
    if let Some(index) = columns.column_index(name) {
        return Ok(index);
    }
    match name.parse::<usize>() {
        Ok(index) if index < columns.len() => Ok(index),
        _ => bail!(
            "Unknown column '{}' (columns: {})",
            name,
            columns.column_names().join(", ")
        ),
    }
}

fn init_config() -> Result<()> {
    let path = ViewConfig::get_config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating config directory {:?}", parent))?;
    }
    std::fs::write(&path, ViewConfig::create_default_with_comments())
        .with_context(|| format!("Error writing config file {:?}", path))?;
    println!("Configuration file created at: {:?}", path);
    Ok(())
}

fn run(args: CliArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ViewConfig::load_from(std::path::Path::new(path))?,
        None => ViewConfig::load()?,
    };
    if args.regex {
        config.search.regex = true;
    }
    if args.exact {
        config.search.smart = false;
    }
    if let Some(length) = args.page_length {
        config.paging.page_length = length;
    }

    let file = args
        .file
        .ok_or_else(|| anyhow!("No data file given, see --help"))?;
    let table = load_file(&file)?;
    debug!(target: "main", "Loaded {} columns from {}", table.columns.len(), file);

    let columns = table.columns.clone();
    let bridge = TableBridge::new(config.display.max_cell_width);
    let mut view = DataView::with_bridge(table.columns, bridge).configured(&config);
    view.add_rows(table.rows, false)?;

    for name in &args.hide {
        view.set_column_visible(resolve_column(&columns, name)?, false, false)?;
    }
    for (name, term) in &args.column_filters {
        let column = resolve_column(&columns, name)?;
        view.filter(config.search_criteria(term.as_str()), Some(column), false)?;
    }
    let keys = args
        .sort
        .iter()
        .map(|(name, order)| {
            Ok(SortKey {
                column: resolve_column(&columns, name)?,
                order: *order,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    view.sort(keys, false)?;

    let term = args.filter.unwrap_or_default();
    let outcome = view.filter(config.search_criteria(term), None, false)?;
    if let DrawOutcome::Drawn(report) = &outcome {
        for error in &report.errors {
            warn!(target: "main", "{}", error);
            eprintln!("Warning: {}", error);
        }
    }

    if let Some(page) = args.page {
        view.paginate(PageAction::Absolute(page - 1), false)?;
    }
    view.draw(false)?;
    view.adjust_column_sizing(false)?;

    println!("{}", view.bridge().render(view.columns().as_slice()));

    let matched = view.display_order().len();
    let window = view.visible_window().len();
    let start = view.pagination().start;
    let (page, pages) = view.pagination().page_info(matched);
    let mut info = if matched == 0 {
        "Showing 0 to 0 of 0 entries".to_string()
    } else {
        format!(
            "Showing {} to {} of {} entries",
            start + 1,
            start + window,
            matched
        )
    };
    if matched != view.row_count() {
        info.push_str(&format!(" (filtered from {} total entries)", view.row_count()));
    }
    if pages > 1 {
        info.push_str(&format!(", page {} of {}", page + 1, pages));
    }
    println!("{}", info);
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let log = init_tracing(if args.verbose { "debug" } else { "info" }, args.verbose);

    if args.help {
        print_help();
        return Ok(());
    }
    if args.init_config {
        return init_config();
    }

    let (show_log, verbose) = (args.show_log, args.verbose);
    let result = run(args);
    if show_log {
        for entry in log.get_recent(SHOWN_LOG_ENTRIES) {
            eprintln!("{}", entry.format_for_display());
        }
    } else if result.is_err() && !verbose {
        // Warnings leading up to the failure were only captured in memory
        for entry in log.problems() {
            eprintln!("{}", entry.format_for_display());
        }
    }
    result
}
