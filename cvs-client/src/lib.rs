//! A minimal CVS client: enough of the wire protocol to fetch the rlog of a
//! module and to check out single file revisions, over pserver, ssh, or a
//! local `cvs server` subprocess.

use std::{
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use tokio::process::Command;

mod connection;
use connection::Connection;

mod error;
pub use error::Error;

pub mod scramble;
pub use scramble::scramble_password;

mod url;
pub use url::{CvsUrl, Scheme, CVS_PSERVER_PORT};

/// The response set advertised to the server during the handshake.
const VALID_RESPONSES: &str = "ok error Valid-requests Checked-in New-entry Checksum Copy-file \
     Updated Created Update-existing Merged Patched Rcs-diff Mode Removed Remove-entry Template \
     Notified Module-expansion Wrapper-rcsOption M Mbinary E F MT";

pub struct Client {
    conn: Connection,
    cvsroot: String,
    module: String,
}

impl Client {
    /// Connects to the CVS server named by `url` and performs the initial
    /// handshake.
    pub async fn connect(url: &CvsUrl) -> Result<Self, Error> {
        let conn = match url.scheme {
            Scheme::Pserver => {
                let host = url.host()?;
                let port = url.port.unwrap_or(CVS_PSERVER_PORT);
                let (user, password) = match (&url.user, &url.password) {
                    (Some(user), Some(password)) => (user.clone(), password.clone()),
                    _ => return Err(Error::InvalidUrl(url.to_string())),
                };

                let mut conn = Connection::tcp(host, port).await?;
                pserver_auth(&mut conn, url.cvsroot(), &user, &password, host).await?;
                conn
            }
            Scheme::Ssh => {
                let mut command = Command::new("ssh");
                if let Some(user) = &url.user {
                    command.arg("-l").arg(user);
                }
                if let Some(port) = url.port {
                    command.arg("-p").arg(port.to_string());
                }
                command
                    .arg("-o")
                    .arg("StrictHostKeyChecking=accept-new")
                    .arg("-o")
                    .arg("BatchMode=yes")
                    .arg("--")
                    .arg(url.host()?)
                    .arg("cvs")
                    .arg("server");
                Connection::spawn(command, "ssh")?
            }
            Scheme::Fake => {
                let mut command = Command::new("cvs");
                command.arg("server");
                Connection::spawn(command, "cvs server")?
            }
            _ => return Err(Error::InvalidUrl(url.to_string())),
        };

        let mut client = Self {
            conn,
            cvsroot: url.cvsroot().to_string(),
            module: url.module().to_string(),
        };
        client.handshake().await?;

        Ok(client)
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        self.conn
            .write_all(
                format!(
                    "Root {}\nValid-responses {}\nvalid-requests\nUseUnchanged\n",
                    self.cvsroot, VALID_RESPONSES
                )
                .as_bytes(),
            )
            .await?;

        let line = self
            .conn
            .read_line()
            .await?
            .ok_or_else(|| Error::Protocol("no response from CVS server".into()))?;
        if !line.starts_with(b"Valid-requests ") {
            return Err(Error::protocol("invalid response from CVS server", &line));
        }

        let line = self
            .conn
            .read_line()
            .await?
            .ok_or_else(|| Error::Protocol("no response from CVS server".into()))?;
        if line != b"ok\n" {
            return Err(Error::protocol("invalid response from CVS server", &line));
        }

        Ok(())
    }

    /// Fetches the module's full rlog into a seekable temporary file.
    pub async fn fetch_rlog(&mut self) -> Result<std::fs::File, Error> {
        let mut output = tempfile::tempfile()?;

        self.conn
            .write_all(
                format!(
                    "Global_option -q\nArgument --\nArgument {}\nrlog\n",
                    self.module
                )
                .as_bytes(),
            )
            .await?;

        loop {
            let line = self
                .conn
                .read_line()
                .await?
                .ok_or_else(|| Error::Protocol("no response from CVS server".into()))?;

            if line == b"ok\n" {
                break;
            } else if line == b"M \n" {
                // An empty output line; rlog pads it with a trailing space.
            } else if line.starts_with(b"E ") || line.starts_with(b"error") {
                return Err(Error::protocol("error response from CVS server", &line));
            } else if line.starts_with(b"M ") {
                output.write_all(&line[2..])?;
            } else if line.starts_with(b"MT text ") || line.starts_with(b"MT date ") {
                output.write_all(&line[8..line.len() - 1])?;
            } else if line.starts_with(b"MT newline") {
                output.write_all(&line[10..])?;
            } else {
                return Err(Error::protocol("bad CVS protocol response", &line));
            }
        }

        output.seek(SeekFrom::Start(0))?;
        Ok(output)
    }

    /// Checks out a single file revision into a temporary file in `dest_dir`.
    ///
    /// With `expand_keywords` unset the server is asked for `-kb`, handing
    /// back the stored bytes without keyword substitution or EOL munging.
    pub async fn checkout(
        &mut self,
        path: &str,
        rev: &str,
        dest_dir: &Path,
        expand_keywords: bool,
    ) -> Result<tempfile::NamedTempFile, Error> {
        let (dirname, filename) = match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };

        let mut output = tempfile::Builder::new()
            .prefix(&format!("cvsclient-checkout-{}-r{}-", filename, rev))
            .tempfile_in(dest_dir)?;

        let mut request = String::new();
        if !dirname.is_empty() {
            request.push_str(&format!("Directory {}\n{}\n", dirname, dirname));
        }
        request.push_str(&format!(
            "Directory {}\n{}\nGlobal_option -q\nArgument -r{}\n",
            self.module, self.module, rev
        ));
        if !expand_keywords {
            request.push_str("Argument -kb\n");
        }
        request.push_str(&format!("Argument --\nArgument {}\nco \n", path));
        self.conn.write_all(request.as_bytes()).await?;

        let mut skip_line = false;
        let mut expect_modeline = false;
        let mut expect_bytecount = false;
        let mut have_bytecount = false;
        let mut bytecount = 0usize;

        loop {
            if have_bytecount && bytecount > 0 {
                let chunk = self.conn.read_raw(bytecount).await?;
                if chunk.is_empty() {
                    return Err(Error::Protocol(
                        "incomplete file data from CVS server".into(),
                    ));
                }
                output.as_file_mut().write_all(&chunk)?;
                bytecount -= chunk.len();
                continue;
            }

            let line = self
                .conn
                .read_line()
                .await?
                .ok_or_else(|| Error::Protocol("no response from CVS server".into()))?;

            if line.starts_with(b"E ") {
                return Err(Error::protocol("error from CVS server", &line));
            }
            if have_bytecount && bytecount == 0 && line == b"ok\n" {
                break;
            }

            if skip_line {
                skip_line = false;
            } else if expect_bytecount {
                bytecount = std::str::from_utf8(strip_eol(&line))
                    .ok()
                    .and_then(|count| count.parse().ok())
                    .ok_or_else(|| Error::protocol("bad CVS protocol response", &line))?;
                have_bytecount = true;
            } else if line == b"M \n" || line == b"MT +updated\n" || line == b"MT -updated\n" {
                // Progress chatter.
            } else if line.starts_with(b"MT fname ") {
                // Progress chatter.
            } else if line.starts_with(b"Created ") {
                // The repository pathname follows on its own line.
                skip_line = true;
            } else if line.starts_with(b"/") {
                // The Entries line; the mode line comes next.
                expect_modeline = true;
            } else if expect_modeline && line.starts_with(b"u=") {
                expect_modeline = false;
                expect_bytecount = true;
            } else if line.starts_with(b"M ")
                || line.starts_with(b"MT text ")
                || line.starts_with(b"MT newline")
            {
                // Progress chatter.
            } else {
                return Err(Error::protocol("bad CVS protocol response", &line));
            }
        }

        output.as_file_mut().flush()?;
        output.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(output)
    }

    /// Tears down the connection, killing and reaping any server subprocess.
    pub async fn shutdown(self) -> Result<(), Error> {
        self.conn.shutdown().await
    }
}

async fn pserver_auth(
    conn: &mut Connection,
    cvsroot: &str,
    user: &str,
    password: &str,
    host: &str,
) -> Result<(), Error> {
    let mut request = Vec::new();
    request.extend_from_slice(b"BEGIN AUTH REQUEST\n");
    request.extend_from_slice(cvsroot.as_bytes());
    request.push(b'\n');
    request.extend_from_slice(user.as_bytes());
    request.push(b'\n');
    request.extend_from_slice(&scramble_password(password));
    request.push(b'\n');
    request.extend_from_slice(b"END AUTH REQUEST\n");
    conn.write_all(&request).await?;

    match conn.read_line().await? {
        Some(line) if line == b"I LOVE YOU\n" => Ok(()),
        _ => Err(Error::AuthFailed(host.to_string())),
    }
}

fn strip_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    async fn client_with(input: &[u8]) -> (Client, DuplexStream) {
        let (local, mut remote) = tokio::io::duplex(256 * 1024);
        remote.write_all(input).await.unwrap();
        let (reader, writer) = tokio::io::split(local);

        (
            Client {
                conn: Connection::from_parts(reader, writer, None),
                cvsroot: "/cvsroot".into(),
                module: "runbaby".into(),
            },
            remote,
        )
    }

    async fn sent(remote: &mut DuplexStream) -> Vec<u8> {
        let mut request = vec![0u8; 64 * 1024];
        let n = remote.read(&mut request).await.unwrap();
        request.truncate(n);
        request
    }

    #[tokio::test]
    async fn test_handshake() {
        let (mut client, mut remote) =
            client_with(b"Valid-requests Root Valid-responses valid-requests co\nok\n").await;
        client.handshake().await.unwrap();

        let request = sent(&mut remote).await;
        assert!(request.starts_with(b"Root /cvsroot\nValid-responses "));
        assert!(request.ends_with(b"valid-requests\nUseUnchanged\n"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_garbage() {
        let (mut client, _remote) = client_with(b"gibberish\n").await;
        assert!(matches!(
            client.handshake().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_pserver_auth() {
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        remote.write_all(b"I LOVE YOU\n").await.unwrap();
        let (reader, writer) = tokio::io::split(local);
        let mut conn = Connection::from_parts(reader, writer, None);

        pserver_auth(&mut conn, "/cvsroot", "anonymous", "p", "cvs.example.com")
            .await
            .unwrap();

        let request = sent(&mut remote).await;
        assert_eq!(
            request,
            b"BEGIN AUTH REQUEST\n/cvsroot\nanonymous\nA:\nEND AUTH REQUEST\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_pserver_auth_rejection() {
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        remote.write_all(b"I HATE YOU\n").await.unwrap();
        let (reader, writer) = tokio::io::split(local);
        let mut conn = Connection::from_parts(reader, writer, None);

        assert!(matches!(
            pserver_auth(&mut conn, "/cvsroot", "anonymous", "p", "host").await,
            Err(Error::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_rlog() {
        let (mut client, mut remote) = client_with(
            b"M RCS file: /cvsroot/runbaby/hello.c,v\nM \nMT text total revisions: 1\nMT newline\nok\n",
        )
        .await;

        let mut file = client.fetch_rlog().await.unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(
            contents,
            "RCS file: /cvsroot/runbaby/hello.c,v\ntotal revisions: 1\n"
        );

        let request = sent(&mut remote).await;
        assert_eq!(
            request,
            b"Global_option -q\nArgument --\nArgument runbaby\nrlog\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_fetch_rlog_error_response() {
        let (mut client, _remote) = client_with(b"E cvs rlog: cannot find module\n").await;
        assert!(matches!(
            client.fetch_rlog().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_without_trailing_newline() {
        // Five declared bytes, not newline-terminated, followed by ok.
        let (mut client, mut remote) = client_with(
            b"Created runbaby\n/cvsroot/runbaby/hello.c,v\n/hello.c/1.1///\nu=rw,g=r,o=r\n5\nhellook\n",
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let mut out = client
            .checkout("runbaby/hello.c", "1.1", dir.path(), false)
            .await
            .unwrap();

        let mut contents = Vec::new();
        out.as_file_mut().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");

        let request = sent(&mut remote).await;
        let request = String::from_utf8(request).unwrap();
        assert!(request.contains("Directory runbaby\nrunbaby\n"));
        assert!(request.contains("Argument -r1.1\n"));
        assert!(request.contains("Argument -kb\n"));
        assert!(request.ends_with("Argument --\nArgument runbaby/hello.c\nco \n"));
    }

    #[tokio::test]
    async fn test_checkout_keyword_expansion_drops_kb() {
        let (mut client, mut remote) =
            client_with(b"/hello.c/1.1///\nu=rw\n2\nhi\nok\n").await;

        let dir = tempfile::tempdir().unwrap();
        client
            .checkout("hello.c", "1.1", dir.path(), true)
            .await
            .unwrap();

        let request = String::from_utf8(sent(&mut remote).await).unwrap();
        assert!(!request.contains("-kb"));
    }

    #[tokio::test]
    async fn test_checkout_rejects_error_line() {
        let (mut client, _remote) =
            client_with(b"E cvs server: cannot find hello.c\n").await;

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            client.checkout("hello.c", "1.1", dir.path(), false).await,
            Err(Error::Protocol(_))
        ));
    }
}
