//! Thin line-protocol client: the external collaborator the agent's
//! wire protocol is written against, kept around so the crate is
//! runnable end to end.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "secmemctl", about = "CLI for secmem-agent")]
struct Args {
    #[arg(long, env = "SECMEM_SOCKET", default_value = "/tmp/secmem.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Store a secret: name=value, with an optional --ttl like 30s/15m/2h/1d.
    Put {
        item: String,
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Fetch a secret's value.
    Get { name: String },
    /// Delete a secret.
    Del { name: String },
    /// List live keys and their remaining TTL.
    List,
    /// Query remaining TTL for a key.
    Ttl { name: String },
    /// Liveness check.
    Ping,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let stream = UnixStream::connect(&args.socket)
        .map_err(|e| anyhow!("connect {}: {e}", args.socket.display()))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    match args.cmd {
        Cmd::Put { item, ttl } => put_cmd(&mut writer, &mut reader, &item, ttl.as_deref()),
        Cmd::Get { name } => get_cmd(&mut writer, &mut reader, &name),
        Cmd::Del { name } => {
            let line = format!("DEL {name}\n");
            writer.write_all(line.as_bytes())?;
            match read_status(&mut reader)? {
                Status::OkNum(n) => {
                    println!("{}", if n == 1 { "deleted" } else { "not found" });
                    Ok(())
                }
                Status::Ok => Ok(()),
                Status::Err(e) => bail!("agent error: {e}"),
            }
        }
        Cmd::List => {
            writer.write_all(b"LIST\n")?;
            let mut header = String::new();
            reader.read_line(&mut header)?;
            if header.trim_end() != "LIST" {
                bail!("unexpected response: {}", header.trim_end());
            }
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line)?;
                if n == 0 {
                    bail!("connection closed before END");
                }
                let line = line.trim_end_matches(['\n', '\r']);
                if line == "END" {
                    break;
                }
                println!("{line}");
            }
            Ok(())
        }
        Cmd::Ttl { name } => {
            let line = format!("TTL {name}\n");
            writer.write_all(line.as_bytes())?;
            match read_status(&mut reader)? {
                Status::OkNum(secs) => {
                    println!("{secs}");
                    Ok(())
                }
                Status::Ok => Ok(()),
                Status::Err(e) => bail!("agent error: {e}"),
            }
        }
        Cmd::Ping => {
            writer.write_all(b"PING\n")?;
            match read_status(&mut reader)? {
                Status::Ok | Status::OkNum(_) => {
                    println!("PONG");
                    Ok(())
                }
                Status::Err(e) => bail!("agent error: {e}"),
            }
        }
    }
}

fn put_cmd(
    writer: &mut UnixStream,
    reader: &mut BufReader<UnixStream>,
    item: &str,
    ttl: Option<&str>,
) -> Result<()> {
    let (name, value) = parse_item(item)?;
    let ttl_token = ttl.unwrap_or("-");
    let payload = value.into_bytes();
    let header = format!("PUT {name} {ttl_token} {}\n", payload.len());
    writer.write_all(header.as_bytes())?;
    writer.write_all(&payload)?;
    match read_status(reader)? {
        Status::Ok | Status::OkNum(_) => {
            println!("ok");
            Ok(())
        }
        Status::Err(e) => bail!("agent error: {e}"),
    }
}

fn get_cmd(writer: &mut UnixStream, reader: &mut BufReader<UnixStream>, name: &str) -> Result<()> {
    let line = format!("GET {name}\n");
    writer.write_all(line.as_bytes())?;
    let mut header = String::new();
    reader.read_line(&mut header)?;
    let header = header.trim_end();
    if let Some(rest) = header.strip_prefix("VALUE ") {
        let len: usize = rest
            .parse()
            .map_err(|_| anyhow!("malformed VALUE header: {header}"))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        match String::from_utf8(buf) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                let bytes = e.into_bytes();
                std::io::stdout().write_all(&bytes)?;
                println!();
            }
        }
        Ok(())
    } else if let Some(rest) = header.strip_prefix("ERR ") {
        bail!("agent error: {rest}")
    } else {
        bail!("unexpected response: {header}")
    }
}

enum Status {
    Ok,
    OkNum(u64),
    Err(String),
}

fn read_status(reader: &mut BufReader<UnixStream>) -> Result<Status> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        bail!("connection closed by agent");
    }
    let line = line.trim_end();
    if line == "OK" {
        Ok(Status::Ok)
    } else if let Some(rest) = line.strip_prefix("OK ") {
        let n: u64 = rest
            .parse()
            .map_err(|_| anyhow!("malformed OK response: {line}"))?;
        Ok(Status::OkNum(n))
    } else if let Some(rest) = line.strip_prefix("ERR ") {
        Ok(Status::Err(rest.to_string()))
    } else {
        bail!("unexpected response: {line}")
    }
}

fn parse_item(item: &str) -> Result<(String, String)> {
    let mut parts = item.splitn(2, '=');
    let name = parts.next().unwrap_or_default();
    let value = parts
        .next()
        .ok_or_else(|| anyhow!("item must be name=value"))?;
    Ok((name.to_string(), value.to_string()))
}
