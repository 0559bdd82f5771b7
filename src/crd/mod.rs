mod innodb_cluster;
mod mysql_backup;

pub use innodb_cluster::*;
pub use mysql_backup::*;
