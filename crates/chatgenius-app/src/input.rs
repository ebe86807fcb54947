use thiserror::Error;

pub const HELP: &str = "\
Commands:
  /signup <username> <password>   create an account and sign in
  /login <username> <password>    sign in
  /logout                         sign out
  /channels                       list channels
  /new <name> [description]       create a channel
  /join <name>                    switch to a channel
  /users                          list users
  /help                           show this help
  /quit                           exit
Anything else is sent to the current channel.";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    SignUp { username: String, password: String },
    SignIn { username: String, password: String },
    SignOut,
    Channels,
    NewChannel { name: String, description: String },
    Join(String),
    Users,
    Help,
    Quit,
    Say(String),
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command /{0}, try /help")]
    Unknown(String),
}

pub fn parse(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Blank);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_string()));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "signup" | "login" => {
            let usage = if name == "signup" {
                "/signup <username> <password>"
            } else {
                "/login <username> <password>"
            };
            let mut args = rest.split_whitespace();
            let (Some(username), Some(password), None) = (args.next(), args.next(), args.next()) else {
                return Err(InputError::Usage(usage));
            };
            let (username, password) = (username.to_string(), password.to_string());
            Ok(if name == "signup" {
                Input::SignUp { username, password }
            } else {
                Input::SignIn { username, password }
            })
        }
        "logout" => Ok(Input::SignOut),
        "channels" => Ok(Input::Channels),
        "new" => {
            let (name, description) = match rest.split_once(char::is_whitespace) {
                Some((name, description)) => (name, description.trim()),
                None => (rest, ""),
            };
            if name.is_empty() {
                return Err(InputError::Usage("/new <name> [description]"));
            }
            Ok(Input::NewChannel {
                name: name.to_string(),
                description: description.to_string(),
            })
        }
        "join" => {
            let name = rest.trim_start_matches('#');
            if name.is_empty() {
                return Err(InputError::Usage("/join <name>"));
            }
            Ok(Input::Join(name.to_string()))
        }
        "users" => Ok(Input::Users),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(InputError::Unknown(other.to_string())),
    }
}
