use std::path::PathBuf;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches};
use tracing::debug;

use flatfat::volume::DeletePolicy;
use flatfat::{Command, Config, OutputFormat, Shell};

fn cli() -> clap::Command {
    let name_arg = || Arg::new("name").help("File name on the volume").required(true);

    clap::Command::new("flatfat")
        .version("0.1.0")
        .about("Inspect and edit FAT-style volume images")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (repeatable)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print results as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("orphan-on-delete")
                .long("orphan-on-delete")
                .help("Leave the blocks of deleted files allocated")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("image")
                .help("Path to the volume image")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .subcommand_required(true)
        .subcommand(
            clap::Command::new("format")
                .about("Create a fresh volume image")
                .arg(
                    Arg::new("data-blocks")
                        .long("data-blocks")
                        .help("Number of data blocks")
                        .required(true)
                        .value_parser(value_parser!(u16)),
                ),
        )
        .subcommand(clap::Command::new("info").about("Show volume geometry and usage"))
        .subcommand(clap::Command::new("ls").about("List files"))
        .subcommand(
            clap::Command::new("add")
                .about("Copy a host file onto the volume")
                .arg(
                    Arg::new("host")
                        .help("Host file to copy")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Name on the volume (defaults to the host file name)"),
                ),
        )
        .subcommand(
            clap::Command::new("cat")
                .about("Print a file to stdout")
                .arg(name_arg()),
        )
        .subcommand(clap::Command::new("rm").about("Delete a file").arg(name_arg()))
        .subcommand(
            clap::Command::new("stat")
                .about("Show a file's size and first block")
                .arg(name_arg()),
        )
        .subcommand(clap::Command::new("verify").about("Check every block chain"))
}

fn name_of(matches: &ArgMatches) -> anyhow::Result<String> {
    matches
        .get_one::<String>("name")
        .cloned()
        .context("missing file name")
}

fn parse_command(matches: &ArgMatches) -> anyhow::Result<Command> {
    let command = match matches.subcommand() {
        Some(("format", sub)) => Command::Format {
            data_blocks: *sub
                .get_one::<u16>("data-blocks")
                .context("missing --data-blocks")?,
        },
        Some(("info", _)) => Command::Info,
        Some(("ls", _)) => Command::Ls,
        Some(("add", sub)) => Command::Add {
            host: sub
                .get_one::<PathBuf>("host")
                .cloned()
                .context("missing host file")?,
            name: sub.get_one::<String>("name").cloned(),
        },
        Some(("cat", sub)) => Command::Cat { name: name_of(sub)? },
        Some(("rm", sub)) => Command::Rm { name: name_of(sub)? },
        Some(("stat", sub)) => Command::Stat { name: name_of(sub)? },
        Some(("verify", _)) => Command::Verify,
        _ => anyhow::bail!("unknown command"),
    };
    Ok(command)
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let image = matches
        .get_one::<PathBuf>("image")
        .cloned()
        .context("missing image path")?;
    let mut config = Config::new(image).with_verbosity(matches.get_count("verbose"));
    if matches.get_flag("json") {
        config = config.with_output(OutputFormat::Json);
    }
    if matches.get_flag("orphan-on-delete") {
        config = config.with_delete_policy(DeletePolicy::Orphan);
    }

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .init();

    let command = parse_command(&matches)?;
    debug!("Running {:?} on {}", command, config.image.display());

    let shell = Shell::new(config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    shell
        .run(&command, &mut out)
        .with_context(|| format!("{:?} failed on {}", command, shell.config().image.display()))?;
    Ok(())
}
