pub mod cluster;
pub mod response;

pub use cluster::{
    ClickHouseConfig, ClusterMode, Disk, DiskHdfs, DiskLocal, DiskS3, Policy, Replica, Shard,
    SshAuth, Storage, User, UsersConf, Volume, DEFAULT_DATABASE, DEFAULT_DISK, DEFAULT_USER,
};
pub use response::{DeployResponse, RetCode};
