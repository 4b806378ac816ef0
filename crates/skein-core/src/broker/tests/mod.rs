use super::*;
use crate::clock::ManualClock;
use crate::error::{BindError, PublishError, QueueError, ValidationError};
use crate::message::{Delay, NewMessage};
use crate::routing::RouteMatch;
use crate::storage::RocksDbStorage;
use serde_json::json;
use std::time::Duration;

mod common;
use common::*;
