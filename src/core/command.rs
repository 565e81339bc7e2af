use bytes::Bytes;

/// A command ready to be sent to Redis.
///
/// Every argument is sent as a bulk string, whatever its semantic type:
/// integers are stringified before they are added.
///
/// # Example
///
/// ```
/// use plexis::core::command::{self, Cmd};
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.args().len(), 3);
///
/// let get_cmd = command::get("key");
/// assert_eq!(get_cmd.name(), b"GET");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name (e.g., "GET", "SET", "DEL")
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Builds a command from a full argument list, name first.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an integer argument in its decimal form.
    #[inline]
    pub fn arg_int(self, arg: i64) -> Self {
        self.arg(arg.to_string())
    }

    /// Appends every argument from an iterator.
    pub fn args_from<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns all arguments, name first.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Returns the command name as sent.
    #[inline]
    pub fn name(&self) -> &[u8] {
        self.args.first().map(|a| &a[..]).unwrap_or_default()
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates an ECHO command.
#[inline]
pub fn echo(msg: impl Into<Bytes>) -> Cmd {
    Cmd::new("ECHO").arg(msg)
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a DEL command.
#[inline]
pub fn del<I, K>(keys: I) -> Cmd
where
    I: IntoIterator<Item = K>,
    K: Into<Bytes>,
{
    Cmd::new("DEL").args_from(keys)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("EXISTS").arg(key)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates an INCRBY command.
#[inline]
pub fn incr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("INCRBY").arg(key).arg_int(amount)
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a SELECT command.
#[inline]
pub fn select(db: u32) -> Cmd {
    Cmd::new("SELECT").arg(db.to_string())
}

/// Creates a CLIENT SETNAME command.
#[inline]
pub fn client_setname(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("CLIENT").arg("SETNAME").arg(name)
}

/// Creates a PUBLISH command.
#[inline]
pub fn publish(channel: impl Into<Bytes>, message: impl Into<Bytes>) -> Cmd {
    Cmd::new("PUBLISH").arg(channel).arg(message)
}

/// Creates a SUBSCRIBE command for one channel.
#[inline]
pub fn subscribe(channel: impl Into<Bytes>) -> Cmd {
    Cmd::new("SUBSCRIBE").arg(channel)
}

/// Creates an UNSUBSCRIBE command for one channel.
#[inline]
pub fn unsubscribe(channel: impl Into<Bytes>) -> Cmd {
    Cmd::new("UNSUBSCRIBE").arg(channel)
}

/// Creates a PSUBSCRIBE command for one pattern.
#[inline]
pub fn psubscribe(pattern: impl Into<Bytes>) -> Cmd {
    Cmd::new("PSUBSCRIBE").arg(pattern)
}

/// Creates a PUNSUBSCRIBE command for one pattern.
#[inline]
pub fn punsubscribe(pattern: impl Into<Bytes>) -> Cmd {
    Cmd::new("PUNSUBSCRIBE").arg(pattern)
}

/// Creates a SCRIPT LOAD command.
#[inline]
pub fn script_load(script: impl Into<Bytes>) -> Cmd {
    Cmd::new("SCRIPT").arg("LOAD").arg(script)
}

/// Creates a SCRIPT FLUSH command.
#[inline]
pub fn script_flush() -> Cmd {
    Cmd::new("SCRIPT").arg("FLUSH")
}

/// Creates an EVALSHA command.
pub fn evalsha(digest: impl Into<Bytes>, keys: &[Bytes], args: &[Bytes]) -> Cmd {
    Cmd::new("EVALSHA")
        .arg(digest)
        .arg(keys.len().to_string())
        .args_from(keys.iter().cloned())
        .args_from(args.iter().cloned())
}

/// Creates an EVAL command.
pub fn eval(script: impl Into<Bytes>, keys: &[Bytes], args: &[Bytes]) -> Cmd {
    Cmd::new("EVAL")
        .arg(script)
        .arg(keys.len().to_string())
        .args_from(keys.iter().cloned())
        .args_from(args.iter().cloned())
}

/// Creates a SCAN command.
///
/// # Arguments
///
/// * `cursor` - Cursor returned by the previous call, `0` to start
/// * `pattern` - Optional MATCH pattern
/// * `count` - Optional COUNT hint
pub fn scan(cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Cmd {
    let mut cmd = Cmd::new("SCAN").arg(cursor.to_string());
    if let Some(pattern) = pattern {
        cmd = cmd.arg("MATCH").arg(pattern.to_string());
    }
    if let Some(count) = count {
        cmd = cmd.arg("COUNT").arg(count.to_string());
    }
    cmd
}
