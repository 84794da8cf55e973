use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use page_sort::{ExternalSortBuilder, InputPolicy, Offset};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let buffers: usize = arg_parser.value_of_t_or_exit("buffers");
    let offset: OffsetArg = arg_parser.value_of_t_or_exit("offset");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let page_size = arg_parser.value_of("page_size").expect("value has default");
    let input = arg_parser.value_of("input").expect("value is required");

    let mut sorter_builder = ExternalSortBuilder::new()
        .with_buffers(buffers)
        .with_page_size(page_size.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize)
        .with_offset(offset.0);

    if arg_parser.is_present("lenient") {
        sorter_builder = sorter_builder.with_input_policy(InputPolicy::Lenient);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let outcome = match sorter.sort_file(path::Path::new(input)) {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    log::info!(
        "{} values sorted in {:?} (pages: {}, offset: {}, merge rounds: {}, temporary files: {})",
        outcome.values.len(),
        outcome.stats.elapsed,
        outcome.stats.pages,
        outcome.stats.offset_pages,
        outcome.stats.merge_rounds,
        outcome.stats.temp_files,
    );

    let output_stream: Box<dyn Write> = match arg_parser.value_of("output") {
        Some(output) => match fs::File::create(output) {
            Ok(file) => Box::new(file),
            Err(err) => {
                log::error!("output file creation error: {}", err);
                process::exit(1);
            }
        },
        None => Box::new(io::stdout()),
    };
    let mut output_stream = io::BufWriter::new(output_stream);

    for value in outcome.values {
        if let Err(err) = writeln!(output_stream, "{}", value) {
            log::error!("data saving error: {}", err);
            process::exit(1);
        };
    }

    if let Err(err) = output_stream.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

/// Offset argument: `none`, `auto` or a number of pages.
#[derive(Copy, Clone)]
struct OffsetArg(Offset);

impl std::str::FromStr for OffsetArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(OffsetArg(Offset::None)),
            "auto" => Ok(OffsetArg(Offset::Detect)),
            pages => pages
                .parse::<u64>()
                .map(|pages| OffsetArg(Offset::Fixed(pages)))
                .map_err(|err| format!("offset must be 'none', 'auto' or a number of pages: {}", err)),
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("page-sort")
        .about("page-oriented external integer sorter")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted, one integer per line")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, standard output if omitted")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("buffers")
                .short('b')
                .long("buffers")
                .help("number of page buffers, one of them is reserved for merge output")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            clap::Arg::new("page_size")
                .short('p')
                .long("page-size")
                .help("page size")
                .takes_value(true)
                .default_value("4KiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Page size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("offset")
                .long("offset")
                .help("number of leading pages already sorted, 'auto' or 0 to detect them, 'none' to sort every page")
                .takes_value(true)
                .default_value("none"),
        )
        .arg(
            clap::Arg::new("lenient")
                .long("lenient")
                .help("trim input lines and skip the ones that are not integers"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
