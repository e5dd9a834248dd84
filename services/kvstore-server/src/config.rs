//! CLI configuration, built with clap's builder API in the teacher's
//! `Command::new(...).arg(Arg::new(...).value_parser(...))` shape.

use clap::{Arg, Command};

pub struct Config {
    pub port: u16,
    pub purge_interval_secs: u64,
    pub topic_queue_capacity: usize,
}

fn is_port(s: &str) -> Result<u16, String> {
    s.parse::<u16>()
        .map_err(|_| format!("{s:?} is not a valid port number"))
}

fn is_positive_secs(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err("interval must be greater than zero".to_owned()),
        Err(_) => Err(format!("{s:?} is not a valid number of seconds")),
    }
}

fn is_positive_capacity(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err("queue capacity must be greater than zero".to_owned()),
        Err(_) => Err(format!("{s:?} is not a valid queue capacity")),
    }
}

pub fn parse_args() -> Config {
    let matches = Command::new("kvstore-server")
        .about("A Redis-wire-compatible in-memory key-value and pub/sub server")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_parser(is_port)
                .default_value("36245")
                .help("TCP port to listen on"),
        )
        .arg(
            Arg::new("purge-interval-secs")
                .long("purge-interval-secs")
                .value_parser(is_positive_secs)
                .default_value("10")
                .help("seconds between expiry purge sweeps"),
        )
        .arg(
            Arg::new("topic-queue-capacity")
                .long("topic-queue-capacity")
                .value_parser(is_positive_capacity)
                .default_value("10")
                .help("bounded message queue capacity per pub/sub topic"),
        )
        .get_matches();

    Config {
        port: *matches.get_one::<u16>("port").expect("has a default"),
        purge_interval_secs: *matches
            .get_one::<u64>("purge-interval-secs")
            .expect("has a default"),
        topic_queue_capacity: *matches
            .get_one::<usize>("topic-queue-capacity")
            .expect("has a default"),
    }
}
