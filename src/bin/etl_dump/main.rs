use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use encoding::{Encoding, EncodingRef};
use encoding::all::encodings;
use indoc::indoc;
use log::Level;

use etl_format::{
    FormatOutcome, FormatterSettings, Guid, ManifestRegistry, OutputFormat, ProviderAllowlist,
};

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

mod records;

use records::OwnedRecord;

struct EtlDump {
    settings: FormatterSettings,
    manifests: Vec<PathBuf>,
    input: PathBuf,
    json: bool,
    show_unrecognized: bool,
    output: Box<dyn Write>,
    verbosity_level: Option<Level>,
}

/// Tries to write a line to a given target, aborts program if fails.
macro_rules! try_writeln {
    ($($arg:tt)*) => (
        match writeln!($($arg)*) {
            Ok(_) => {},
            Err(e) => {
                eprintln!("{}", &e);
                exit(1)
            }
        }
    );
}

impl EtlDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("RECORDS")
                .context("RECORDS is a required argument")?,
        );

        let manifests = matches
            .get_many::<String>("manifest")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default();

        let output_format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("legacy") => OutputFormat::LegacyTaskName,
            Some("legacy-source") => OutputFormat::LegacyEventSource,
            _ => OutputFormat::Default,
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let codec_name = matches
            .get_one::<String>("ansi-codec")
            .map(String::as_str)
            .unwrap_or(encoding::all::WINDOWS_1252.name());
        let ansi_codec: EncodingRef = match encodings().iter().find(|c| c.name() == codec_name) {
            Some(codec) => *codec,
            None => bail!("unknown ansi codec `{}`", codec_name),
        };

        let mut providers = if matches.get_flag("service-fabric") {
            ProviderAllowlist::service_fabric()
        } else {
            ProviderAllowlist::new()
        };
        for value in matches.get_many::<String>("well-known").into_iter().flatten() {
            let guid: Guid = value.parse()?;
            providers = providers.well_known(guid);
        }
        for value in matches.get_many::<String>("dynamic").into_iter().flatten() {
            let guid: Guid = value.parse()?;
            providers = providers.dynamic(guid);
        }

        let output: Box<dyn Write> = if let Some(path) = matches.get_one::<String>("output-target")
        {
            match Self::create_output_file(path, !matches.get_flag("no-confirm-overwrite")) {
                Ok(f) => Box::new(f),
                Err(e) => {
                    eprintln!(
                        "An error occurred while creating output file at `{}` - `{}`",
                        path, e
                    );
                    exit(1)
                }
            }
        } else {
            Box::new(io::stdout())
        };

        Ok(EtlDump {
            settings: FormatterSettings::new()
                .output_format(output_format)
                .ansi_codec(ansi_codec)
                .flatten_newlines(!matches.get_flag("keep-newlines"))
                .providers(providers),
            manifests,
            input,
            json: matches.get_flag("json"),
            show_unrecognized: matches.get_flag("show-unrecognized"),
            output,
            verbosity_level,
        })
    }

    /// Main entry point for `EtlDump`
    pub fn run(&mut self) -> Result<()> {
        self.try_to_initialize_logging();

        let mut registry = ManifestRegistry::new(self.settings.clone());
        for path in &self.manifests {
            let xml = fs::read(path)
                .with_context(|| format!("Failed to read manifest {}", path.display()))?;
            let count = registry
                .load_manifest_bytes(&xml)
                .with_context(|| format!("Failed to load manifest {}", path.display()))?;
            log::info!("loaded {} providers from {}", count, path.display());
        }

        let reader: Box<dyn BufRead> = if self.input.as_os_str() == "-" {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(&self.input)
                .with_context(|| format!("Failed to open file {}", self.input.display()))?;
            Box::new(BufReader::new(file))
        };

        for (index, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read records")?;
            if line.trim().is_empty() {
                continue;
            }
            let owned = match OwnedRecord::from_json(&line) {
                Ok(owned) => owned,
                Err(e) => {
                    eprintln!("record {}: {:#}", index + 1, e);
                    continue;
                }
            };
            let extended = owned.extended_data();
            let record = owned.as_record(&extended);

            match registry.format_event(&record) {
                Ok(FormatOutcome::Line(event)) => {
                    if self.json {
                        let value = serde_json::to_string(&event)?;
                        try_writeln!(self.output, "{}", value);
                    } else {
                        try_writeln!(self.output, "{}", event.line);
                    }
                }
                Ok(FormatOutcome::Unrecognized) if self.show_unrecognized => {
                    eprintln!(
                        "record {}: no schema for event {} of provider {}",
                        index + 1,
                        record.descriptor.id,
                        record.provider_id
                    );
                }
                Ok(_) => {}
                Err(e) => eprintln!("record {}: {}", index + 1, e),
            }
        }

        self.output.flush()?;
        Ok(())
    }

    /// If `prompt` is passed, will display a confirmation prompt before overwriting files.
    fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
        let p = path.as_ref();

        if p.is_dir() {
            bail!(
                "There is a directory at {}, refusing to overwrite",
                p.display()
            );
        }

        if p.exists() {
            if prompt {
                match Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to override output file at {}",
                        p.display()
                    ))
                    .default(false)
                    .interact()
                {
                    Ok(true) => Ok(File::create(p)?),
                    Ok(false) => bail!("Cancelled"),
                    Err(e) => bail!(
                        "Failed to write confirmation prompt to term caused by\n{}",
                        e
                    ),
                }
            } else {
                Ok(File::create(p)?)
            }
        } else {
            // Ok to assume p is not an existing directory
            match p.parent() {
                Some(parent) => {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                    Ok(File::create(p)?)
                }
                None => bail!("Output file cannot be root."),
            }
        }
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            match simplelog::WriteLogger::init(
                level.to_level_filter(),
                simplelog::Config::default(),
                io::stderr(),
            ) {
                Ok(_) => {}
                Err(e) => eprintln!("Failed to initialize logging: {:?}", e),
            };
        }
    }
}

fn command() -> Command {
    Command::new("ETL Formatter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to format ETW/LTTng trace events using instrumentation manifests")
        .long_about(indoc!(r#"
            Utility to format ETW/LTTng trace events using instrumentation manifests.

            RECORDS is a JSON Lines file (or `-` for stdin), one event record per line:
              {"provider": "<guid>", "id": 1, "level": 4, "opcode": 0, "task": 0,
               "keywords": 0, "pid": 1, "tid": 2, "timestamp": <filetime>,
               "flags": 0, "activity_id": "<guid>", "payload": [1, 0, 0, 0]}
        "#))
        .arg(Arg::new("RECORDS").required(true))
        .arg(
            Arg::new("manifest")
                .long("manifest")
                .short('m')
                .action(ArgAction::Append)
                .value_name("FILE")
                .help("Instrumentation manifest to load. Can be passed multiple times. \
                       Providers passed with `--dynamic` may instead ship their manifest in the event stream."),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('o')
                .value_parser(["default", "legacy", "legacy-source"])
                .default_value("default")
                .help("Sets the output line format")
                .long_help(indoc!(r#"
                    Sets the output line format:
                        "default"       - timestamp,tid,pid,id,activity,related,level,task,opcode,keywords,type,text
                        "legacy"        - timestamp,level,tid,pid,task.type,text
                        "legacy-source" - same as legacy, with the provider name in place of the task
                "#)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("When set, every decoded event is printed as a JSON object."),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .value_name("FILE")
                .help("Writes output to the file specified instead of stdout, errors will still be printed to stderr. \
                       Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`. \
                       Will create parent directories if needed."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("keep-newlines")
                .long("keep-newlines")
                .action(ArgAction::SetTrue)
                .help("When set, line breaks in event text are kept instead of being replaced with tabs."),
        )
        .arg(
            Arg::new("service-fabric")
                .long("service-fabric")
                .action(ArgAction::SetTrue)
                .help("Treat the Service Fabric providers as well-known and dynamic providers."),
        )
        .arg(
            Arg::new("well-known")
                .long("well-known")
                .action(ArgAction::Append)
                .value_name("GUID")
                .help("Provider whose symbols are split into task/event names and whose context events are correlated."),
        )
        .arg(
            Arg::new("dynamic")
                .long("dynamic")
                .action(ArgAction::Append)
                .value_name("GUID")
                .help("Provider that embeds its manifest in its own event stream."),
        )
        .arg(
            Arg::new("show-unrecognized")
                .long("show-unrecognized")
                .action(ArgAction::SetTrue)
                .help("Report events with no loaded schema on stderr."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_parser(
                    encodings()
                        .iter()
                        .filter(|&e| e.raw_decoder().is_ascii_compatible())
                        .map(|e| e.name())
                        .collect::<Vec<&'static str>>(),
                )
                .default_value(encoding::all::WINDOWS_1252.name())
                .help("When set, controls the codec of ansi encoded strings in event payloads."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace. \
                 trace output is only available in debug builds, as it is extremely verbose"),
        )
}

fn main() {
    let matches = command().get_matches();

    let mut app = match EtlDump::from_cli_matches(&matches) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{:#}", e);
            exit(1)
        }
    };

    if let Err(e) = app.run() {
        eprintln!("{:#}", e);
        exit(1)
    }
}
