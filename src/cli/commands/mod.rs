use crate::external_ip::DEFAULT_LOOKUP_URL;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Pure clap command definitions with zero business logic
///
/// Flags mirror the mysql client, so `-h` is the host and help is `--help` only.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .disable_help_flag(true)
        .arg(
            Arg::new("help")
                .help("Print help")
                .long("help")
                .action(ArgAction::Help),
        )
        .arg(
            Arg::new("host")
                .env("DBPROBE_HOST")
                .help("Connect to host")
                .long("host")
                .short('h')
                .required(true)
                .value_name("HOST"),
        )
        .arg(
            Arg::new("port")
                .alias("Port")
                .default_value("3306")
                .env("DBPROBE_PORT")
                .help("Port number to use for connection")
                .long("port")
                .short('P')
                .value_parser(clap::value_parser!(u16).range(1..)),
        )
        .arg(
            Arg::new("user")
                .env("DBPROBE_USER")
                .help("User for login")
                .long("user")
                .short('u')
                .required(true),
        )
        .arg(
            Arg::new("password")
                .env("DBPROBE_PASSWORD")
                .hide_env_values(true)
                .help("Password to use when connecting to server")
                .long("password")
                .short('p')
                .required(true),
        )
        .arg(
            Arg::new("ssl-ca")
                .env("DBPROBE_SSL_CA")
                .help("CA file in PEM format, enables TLS")
                .long("ssl-ca")
                .long_help(
                    "CA file in PEM format. Enables TLS.\n\n\
                    The connection is made to the resolved IP address while the\n\
                    certificate is matched against the name given with --host."
                )
                .value_name("PATH"),
        )
        .arg(
            Arg::new("ssl-verify-server-cert")
                .action(ArgAction::SetTrue)
                .env("DBPROBE_SSL_VERIFY_SERVER_CERT")
                .help("Verify server's \"Common Name\" in its cert against hostname used when connecting")
                .long("ssl-verify-server-cert"),
        )
        .arg(
            Arg::new("connect-timeout")
                .default_value("30")
                .env("DBPROBE_CONNECT_TIMEOUT")
                .help("Seconds to wait for the connection and ping")
                .long("connect-timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("external-ip-lookup")
                .default_value(DEFAULT_LOOKUP_URL)
                .env("DBPROBE_EXTERNAL_IP_LOOKUP")
                .help("URL returning the caller's public IP as plain text, empty to disable")
                .long("external-ip-lookup")
                .value_name("URL"),
        )
        .arg(
            Arg::new("debug")
                .action(ArgAction::SetTrue)
                .env("DBPROBE_DEBUG")
                .help("Enable debug logging on stderr")
                .long("debug"),
        )
        .arg(
            Arg::new("dbname")
                .env("DBPROBE_DATABASE")
                .help("Database to connect to")
                .required(true)
                .value_name("DBNAME"),
        )
}
