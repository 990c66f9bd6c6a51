use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command, value_parser};
use mirrorflow_core::config::{
    FailurePolicy, Properties, RelayConfig, Settings, SinkType, TopicFilter, load_properties,
};
use mirrorflow_core::{Error, Result};

pub(super) fn root_cli() -> Command {
    Command::new("mirrorflow")
        .about("Mirrors topics from one or more Kafka clusters to another one")
        .arg(
            Arg::new("consumer-config")
                .long("consumer-config")
                .value_name("FILE")
                .help("Consumer properties of a source cluster, repeat once per cluster")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("producer-config")
                .long("producer-config")
                .value_name("FILE")
                .help("Producer properties of the target cluster, required with the kafka sink")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("num-producers")
                .long("num-producers")
                .help("Number of producers, keyed records are spread over them by key")
                .default_value("1")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("num-streams")
                .long("num-streams")
                .help("Number of consumer streams per source cluster")
                .default_value("1")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("queue-size")
                .long("queue-size")
                .help("Number of unkeyed records buffered between the consumers and the producers")
                .default_value("10000")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("whitelist")
                .long("whitelist")
                .help("Comma separated regular expressions of the topics to mirror"),
        )
        .arg(
            Arg::new("blacklist")
                .long("blacklist")
                .help("Comma separated regular expressions of the topics not to mirror"),
        )
        .group(
            ArgGroup::new("filter")
                .args(["whitelist", "blacklist"])
                .required(true),
        )
        .arg(
            Arg::new("sink")
                .long("sink")
                .help("Where to write the records")
                .default_value("kafka")
                .value_parser(["kafka", "log"]),
        )
        .arg(
            Arg::new("abort-on-send-failure")
                .long("abort-on-send-failure")
                .help("Shut the mirror down as soon as a worker fails")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("drain-timeout-secs")
                .long("drain-timeout-secs")
                .help("How long shutdown waits for the workers at each step")
                .default_value("30")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("metrics-port")
                .long("metrics-port")
                .help("Serve /metrics and /livez on this port")
                .value_parser(value_parser!(u16)),
        )
}

/// Turns the parsed command line into [Settings], loading the properties files it names.
pub(super) fn settings(matches: &ArgMatches) -> Result<Settings> {
    let sink_type: SinkType = matches
        .get_one::<String>("sink")
        .map(|sink| sink.parse())
        .transpose()?
        .unwrap_or_default();

    let source_configs = matches
        .get_many::<PathBuf>("consumer-config")
        .into_iter()
        .flatten()
        .map(|path| load_properties(path))
        .collect::<Result<Vec<_>>>()?;

    let sink_config = match (matches.get_one::<PathBuf>("producer-config"), sink_type) {
        (Some(path), _) => load_properties(path)?,
        (None, SinkType::Log) => Properties::new(),
        (None, SinkType::Kafka) => {
            return Err(Error::Config(
                "--producer-config is required with the kafka sink".to_string(),
            ));
        }
    };

    let topic_filter = TopicFilter::from_options(
        matches.get_one::<String>("whitelist").map(String::as_str),
        matches.get_one::<String>("blacklist").map(String::as_str),
    )?;

    let on_failure = if matches.get_flag("abort-on-send-failure") {
        FailurePolicy::Shutdown
    } else {
        FailurePolicy::Continue
    };

    let relay = RelayConfig {
        num_senders: count(matches, "num-producers"),
        num_streams: count(matches, "num-streams"),
        channel_capacity: count(matches, "queue-size"),
        on_failure,
        drain_timeout: Duration::from_secs(
            matches
                .get_one::<u64>("drain-timeout-secs")
                .copied()
                .unwrap_or(30),
        ),
    };

    let settings = Settings {
        relay,
        topic_filter,
        source_configs,
        sink_config,
        sink_type,
        metrics_port: matches.get_one::<u16>("metrics-port").copied(),
    };
    settings.validate()?;
    Ok(settings)
}

// every count argument has a default value
fn count(matches: &ArgMatches, id: &str) -> usize {
    matches.get_one::<usize>(id).copied().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn properties_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn parse(args: &[&str]) -> std::result::Result<ArgMatches, clap::Error> {
        root_cli().try_get_matches_from(std::iter::once("mirrorflow").chain(args.iter().copied()))
    }

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_settings_from_args() {
        let consumer_a = properties_file("bootstrap.servers=a:9092\ngroup.id=mirror\n");
        let consumer_b = properties_file("bootstrap.servers=b:9092\ngroup.id=mirror\n");
        let producer = properties_file("bootstrap.servers=target:9092\n");
        let matches = parse(&[
            "--consumer-config",
            consumer_a.path().to_str().unwrap(),
            "--consumer-config",
            consumer_b.path().to_str().unwrap(),
            "--producer-config",
            producer.path().to_str().unwrap(),
            "--num-producers",
            "4",
            "--num-streams",
            "2",
            "--queue-size",
            "100",
            "--whitelist",
            "orders.*, payments",
            "--abort-on-send-failure",
            "--drain-timeout-secs",
            "5",
            "--metrics-port",
            "2469",
        ])
        .unwrap();

        let settings = settings(&matches).unwrap();
        assert_eq!(settings.source_configs.len(), 2);
        assert_eq!(
            settings.source_configs[1].get("bootstrap.servers").unwrap(),
            "b:9092"
        );
        assert_eq!(
            settings.sink_config.get("bootstrap.servers").unwrap(),
            "target:9092"
        );
        assert_eq!(settings.relay.num_senders, 4);
        assert_eq!(settings.relay.num_streams, 2);
        assert_eq!(settings.relay.channel_capacity, 100);
        assert_eq!(settings.relay.on_failure, FailurePolicy::Shutdown);
        assert_eq!(settings.relay.drain_timeout, Duration::from_secs(5));
        assert_eq!(settings.sink_type, SinkType::Kafka);
        assert_eq!(settings.metrics_port, Some(2469));
        assert!(settings.topic_filter.is_allowed("orders-eu"));
        assert!(!settings.topic_filter.is_allowed("users"));
    }

    #[test]
    fn test_defaults_with_log_sink() {
        let consumer = properties_file("bootstrap.servers=a:9092\ngroup.id=mirror\n");
        let matches = parse(&[
            "--consumer-config",
            consumer.path().to_str().unwrap(),
            "--blacklist",
            "internal.*",
            "--sink",
            "log",
        ])
        .unwrap();

        let settings = settings(&matches).unwrap();
        assert_eq!(settings.sink_type, SinkType::Log);
        assert!(settings.sink_config.is_empty());
        assert_eq!(settings.relay.num_senders, 1);
        assert_eq!(settings.relay.num_streams, 1);
        assert_eq!(settings.relay.channel_capacity, 10000);
        assert_eq!(settings.relay.on_failure, FailurePolicy::Continue);
        assert_eq!(settings.relay.drain_timeout, Duration::from_secs(30));
        assert_eq!(settings.metrics_port, None);
        assert!(!settings.topic_filter.is_allowed("internal-audit"));
        assert!(settings.topic_filter.is_allowed("orders"));
    }

    #[test]
    fn test_filter_is_required_and_exclusive() {
        assert!(parse(&["--consumer-config", "c.properties", "--sink", "log"]).is_err());
        assert!(
            parse(&[
                "--consumer-config",
                "c.properties",
                "--whitelist",
                "a",
                "--blacklist",
                "b",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_producer_config_required_for_kafka_sink() {
        let consumer = properties_file("group.id=mirror\n");
        let matches = parse(&[
            "--consumer-config",
            consumer.path().to_str().unwrap(),
            "--whitelist",
            "orders",
        ])
        .unwrap();
        assert!(matches!(settings(&matches), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_producers_rejected() {
        let consumer = properties_file("group.id=mirror\n");
        let matches = parse(&[
            "--consumer-config",
            consumer.path().to_str().unwrap(),
            "--whitelist",
            "orders",
            "--sink",
            "log",
            "--num-producers",
            "0",
        ])
        .unwrap();
        assert!(matches!(settings(&matches), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_consumer_config_file() {
        let matches = parse(&[
            "--consumer-config",
            "/nonexistent/consumer.properties",
            "--whitelist",
            "orders",
            "--sink",
            "log",
        ])
        .unwrap();
        assert!(matches!(settings(&matches), Err(Error::Config(_))));
    }
}
