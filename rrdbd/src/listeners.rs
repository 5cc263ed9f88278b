//! TCP front ends: line ingest and cache queries.
//!
//! Ingest speaks the classic plain-text protocol, one
//! `<metric> <value> <timestamp>` per line; malformed lines are dropped.
//! The query side takes one metric name per line and answers with a JSON
//! array of `[timestamp, value]` pairs from the cache.

use rrdb_cache::MetricCache;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const ACCEPT_POLL: Duration = Duration::from_millis(200);

fn accept_loop<F>(listener: TcpListener, name: &str, handle: F)
where
    F: Fn(TcpStream) + Clone + Send + 'static,
{
    if let Err(err) = listener.set_nonblocking(true) {
        error!(%err, name, "cannot poll listener");
        return;
    }

    while !crate::shutdown_requested() {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nonblocking(false);
                let handle = handle.clone();
                let _ = std::thread::Builder::new()
                    .name(name.to_owned())
                    .spawn(move || handle(stream));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                error!(%err, name, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

pub fn serve_line(listener: TcpListener, cache: Arc<MetricCache>) {
    accept_loop(listener, "rrdb-line", move |stream| {
        handle_line_conn(stream, &cache)
    });
}

fn handle_line_conn(stream: TcpStream, cache: &MetricCache) {
    let peer = peer_name(&stream);
    debug!(peer, "line client connected");

    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        match parse_line(&line) {
            Some((metric, datapoint)) => cache.put(metric, datapoint),
            None => debug!(peer, line, "invalid line received"),
        }
    }
    debug!(peer, "line client disconnected");
}

/// `<metric> <value> <timestamp>`
fn parse_line(line: &str) -> Option<(&str, (u32, f64))> {
    let mut parts = line.split_whitespace();
    let (Some(metric), Some(value), Some(timestamp), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let value: f64 = value.parse().ok()?;
    let timestamp: u32 = timestamp.parse().ok()?;
    Some((metric, (timestamp, value)))
}

pub fn serve_query(listener: TcpListener, cache: Arc<MetricCache>) {
    accept_loop(listener, "rrdb-query", move |stream| {
        handle_query_conn(stream, &cache)
    });
}

fn handle_query_conn(stream: TcpStream, cache: &MetricCache) {
    let peer = peer_name(&stream);
    debug!(peer, "query client connected");

    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        let metric = line.trim();
        if metric.is_empty() {
            continue;
        }
        let datapoints = cache.get(metric);
        let Ok(body) = serde_json::to_string(&datapoints) else {
            continue;
        };
        if writeln!(writer, "{body}").is_err() {
            break;
        }
    }
    debug!(peer, "query client disconnected");
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "peer".to_owned())
}

#[cfg(test)]
mod tests {
    use super::parse_line;

    #[test]
    fn parses_well_formed_lines() {
        assert_eq!(
            parse_line("sys.cpu.user 0.64 1411628779"),
            Some(("sys.cpu.user", (1411628779, 0.64)))
        );
        assert_eq!(
            parse_line("  sys.cpu.user\t1 1411628779 \n"),
            Some(("sys.cpu.user", (1411628779, 1.0)))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "sys.cpu.user",
            "sys.cpu.user 0.64",
            "sys.cpu.user 0.64 not-a-ts",
            "sys.cpu.user x 1411628779",
            "sys.cpu.user 0.64 1411628779 extra",
        ] {
            assert_eq!(parse_line(line), None, "accepted {line:?}");
        }
    }
}
