use std::cmp::Ordering;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_line_sort::{BatchStage, ExternalSorterBuilder, LogProgress, ProgressSink};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let batch_lines: usize = arg_parser.value_of_t_or_exit("batch_lines");
    let buf_size = arg_parser.value_of("buf_size").expect("value is required");
    let total_lines: u64 = arg_parser
        .is_present("total_lines")
        .then(|| arg_parser.value_of_t_or_exit("total_lines"))
        .unwrap_or(0);
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_batch_lines(batch_lines)
        .with_total_lines(total_lines)
        .with_rw_buf_size(
            usize::try_from(buf_size.parse::<ByteSize>().expect("value is pre-validated").as_u64())
                .expect("value is pre-validated"),
        );

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if arg_parser.is_present("progress") {
        sorter_builder = sorter_builder.with_progress(Box::new(ConsoleProgress));
    } else {
        sorter_builder = sorter_builder.with_progress(Box::new(LogProgress));
    }

    let compare: fn(&str, &str) -> Ordering = match order {
        Order::Asc => |a, b| a.cmp(b),
        Order::Desc => |a, b| b.cmp(a),
    };
    let sorter_builder = sorter_builder.with_comparator(compare);

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.sort_file(path::Path::new(input), path::Path::new(output), tmp_dir.map(path::Path::new)) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

/// Prints progress to stderr, rewriting the current line.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn batch(&mut self, current: usize, expected: usize, stage: BatchStage) {
        eprint!("\rWorking on temporary file {}/{} ({})     ", current, expected, stage);
        let _ = io::stderr().flush();
    }

    fn merged(&mut self, percent: u64) {
        eprint!("\rMerged {}% of lines.      ", percent);
        let _ = io::stderr().flush();
    }

    fn finished(&mut self) {
        eprintln!();
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-line-sort")
        .about("external merge sort for text files larger than memory")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
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
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads (and batch partitions) to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary files")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("batch_lines")
                .short('n')
                .long("batch-lines")
                .help("maximum number of lines held in memory per batch")
                .takes_value(true)
                .default_value("1000000"),
        )
        .arg(
            clap::Arg::new("buf_size")
                .short('b')
                .long("buf-size")
                .help("file read/write buffer size")
                .takes_value(true)
                .default_value("8KiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) => match usize::try_from(size.as_u64()) {
                        Ok(0) => Err("Buffer size must be positive".to_string()),
                        Ok(_) => Ok(()),
                        Err(_) => Err(format!("Buffer size too large for this platform: {}", size)),
                    },
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("total_lines")
                .short('c')
                .long("total-lines")
                .help("total number of input lines, used to report merge progress")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("progress")
                .short('p')
                .long("progress")
                .help("print progress to stderr"),
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
