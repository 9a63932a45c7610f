/// Model of the user savepoint stack and its interaction with the single
/// allowed transaction. The compiler uses it to reject malformed scripts,
/// the VM to decide whether a failing program needs a rollback.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stack {
    trans: bool,
    names: Vec<String>,
}

impl Stack {
    pub fn new() -> Stack {
        Stack::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.trans
    }

    pub fn has_savepoints(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn open(&self) -> bool {
        self.in_transaction() || self.has_savepoints()
    }

    /// The outermost savepoint name; releasing it closes everything.
    pub fn top(&self) -> Option<&str> {
        self.names.first().map(|s| s.as_str())
    }

    pub fn begin(&mut self) -> Result<(), String> {
        if self.trans {
            return Err("cannot nest transactions".to_string());
        }
        if self.has_savepoints() {
            return Err(format!(
                "cannot begin a transaction with open savepoints {:?}",
                self.names
            ));
        }
        self.trans = true;
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), String> {
        if !self.trans {
            return Err("no open transaction to commit".to_string());
        }
        self.trans = false;
        self.names.clear();
        Ok(())
    }

    pub fn savepoint(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    /// RELEASE name drops the named savepoint and everything above it.
    pub fn release(&mut self, name: &str) -> Result<(), String> {
        match self.names.iter().rposition(|n| n == name) {
            Some(i) => {
                self.names.truncate(i);
                Ok(())
            }
            None => Err(format!("attempting to release unknown savepoint {}", name)),
        }
    }

    pub fn clear(&mut self) {
        self.trans = false;
        self.names.clear();
    }
}
