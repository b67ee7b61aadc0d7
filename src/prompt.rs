use anyhow::Result;
use std::io::{self, Write};

use crate::importers::Credentials;

pub fn prompt_string(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim_end_matches(['\r', '\n']).to_string())
}

/// Asks for the password of an encrypted export without echoing it.
pub fn prompt_credentials(format: &str) -> Result<Credentials> {
    let pw = rpassword::prompt_password(format!("{format} backup password: "))?;
    Ok(Credentials::password(pw))
}
