//! Otacom command line interface.

use std::process;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::style;
use log::{debug, trace, LevelFilter};
use simplelog::*;

use otacom::{self as ota, FlashReport, Outcome};

const EXIT_FAILED_TARGETS: i32 = 1;
const EXIT_FATAL: i32 = 2;

fn main() {
    println!("[OTA] otacom v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(130);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Otacom pushes a firmware image to one or more devices running an \
            OTA server, all at the same time. For each device it: \n\
               \t* connects to the OTA server (port 2222 by default) \n\
               \t* sends the image size and its CRC-32 \n\
               \t* waits for the device to accept the transfer \n\
               \t* sends the image \n\
               \t* waits for the device to verify the checksum \n\
            \n\
            A device that is not running its bootloader answers that it is \
            rebooting, and otacom reconnects to it automatically.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("TARGETS")
                .help("addresses of the devices to flash")
                .long_help(
                    "addresses of the devices to flash, as `host` or \
                     `host:port`; the default port is used when none is \
                     given.",
                )
                .required(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("IMAGE")
                .help("path to the firmware image to be pushed")
                .long_help(
                    "path to the firmware image to be pushed; when not \
                     set, `otacom` will look for `firmware.bin` in the current \
                     working directory.",
                )
                .short("i")
                .long("image")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PORT")
                .help("OTA server port")
                .short("p")
                .long("port")
                .takes_value(true)
                .default_value("2222")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .help("seconds without any activity before giving up")
                .short("t")
                .long("timeout")
                .takes_value(true)
                .default_value("20")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("MAX_REBOOTS")
                .help("maximum number of reconnects after a device reboot")
                .long_help(
                    "maximum number of reconnects after a device reboot; \
                     unlimited when not set.",
                )
                .short("r")
                .long("max-reboots")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("NO_PROGRESS")
                .help("do not draw progress bars")
                .long("no-progress"),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'otacom -v -v -v' or 'otacom -vvv' vs 'otacom -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    let port = numeric_arg::<u16>(&matches, "PORT", "port");
    let timeout = numeric_arg::<u64>(&matches, "TIMEOUT", "timeout");

    // END - Arguments with default values =====================================

    let mut builder = ota::SettingsBuilder::default()
        .port(port)
        .poll_timeout(Duration::from_secs(timeout))
        .show_progress(!matches.is_present("NO_PROGRESS"));

    // START - Arguments with NO default values ================================

    if matches.is_present("MAX_REBOOTS") {
        builder = builder.max_reboots(numeric_arg::<u32>(&matches, "MAX_REBOOTS", "max-reboots"));
    }

    if let Some(image) = matches.value_of("IMAGE") {
        builder = builder.firmware(image);
    }

    let targets: Vec<String> = matches
        .values_of("TARGETS")
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    // END - Arguments =========================================================

    let settings = builder.finalize();

    let image = match ota::locate_firmware(&settings) {
        Some(image) => image,
        None => {
            println!("[OTA] no firmware image selected, nothing to do");
            process::exit(0);
        }
    };
    println!(
        "[OTA] ⏩ Pushing `{}` to {} target(s)",
        style(image.display()).cyan(),
        targets.len()
    );

    // Run the session =========================================================

    let exit_code = match ota::flash_all(&image, targets.as_slice(), &settings) {
        Ok(report) => {
            print_report(&report);
            if report.all_succeeded() {
                0
            } else {
                EXIT_FAILED_TARGETS
            }
        }
        Err(e) => {
            println!("{}: {}", style("error").red(), e);
            EXIT_FATAL
        }
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Parse a numeric argument or exit with an explanation.
fn numeric_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str, display: &str) -> T {
    value_t!(matches.value_of(name), T).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(display).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap_or_default()).on_red()
        );
        process::exit(-1);
    })
}

fn print_report(report: &FlashReport) {
    for (target, outcome) in &report.outcomes {
        let reboots = report.connections_to(target).saturating_sub(1);
        let note = if reboots > 0 {
            format!(" (after {} reboot(s))", reboots)
        } else {
            String::new()
        };
        match outcome {
            Outcome::Success => println!("[OTA] ✅ {} {}{}", target, style("flashed").green(), note),
            _ if report.stalled.contains(target) => {
                println!("[OTA] ⌛ {} {}", target, style("timed out").yellow())
            }
            _ => println!("[OTA] 💥 {} {}{}", target, style("failed").red(), note),
        }
    }
    if report.aborted() {
        println!(
            "[OTA] {}",
            style("event queue reached timeout - check your connection").yellow()
        );
    }
}
