//! # reaper-aws
//!
//! Thin AWS API clients for the cleanup handler.
//!
//! Covers exactly the calls the teardown path needs: EC2 instance
//! discovery and termination, IAM instance-profile removal, and EKS
//! cluster lookup plus bearer-token minting for kubectl. Requests are
//! signed with SigV4 directly and responses are decoded from the query
//! XML or REST JSON each service speaks.
//!
//! Clients take an explicit endpoint override so tests can run against
//! a local mock server.

mod credentials;
mod ec2;
mod eks;
mod error;
mod iam;
mod query;
mod sign;
mod token;
mod xml;

pub use credentials::Credentials;
pub use ec2::{Ec2Client, Filter, InstanceSummary};
pub use eks::{ClusterInfo, EksClient};
pub use error::AwsError;
pub use iam::IamClient;
pub use token::eks_bearer_token;
