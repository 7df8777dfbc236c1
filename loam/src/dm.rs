use no_std_net::SocketAddr;
use std_alloc::string::ToString;

use loam_msg::{Code, Message, Payload, Type};

use crate::core::{Context, Error};
use crate::dispatch::HandleResult;
use crate::net::Transport;
use crate::peer::PeerKey;
use crate::time::Clock;
use crate::transaction::{Purpose, ResultHandler, Transaction};
use crate::uri::Uri;

impl<T: Transport, C: Clock> Context<T, C> {
  /// Route an inbound device-management request to the object store
  /// (client role).
  ///
  /// The method/path matrix:
  /// * GET reads (and may carry Observe to enter observation)
  /// * POST to an object creates; to a fresh instance creates; to a live
  ///   instance writes; to a resource executes
  /// * PUT with a body writes; with only a query writes attributes
  /// * DELETE deletes an instance, nothing else
  pub(crate) fn handle_dm_request(&mut self,
                                  uri: &Uri,
                                  session: SocketAddr,
                                  msg: &Message,
                                  resp: &mut Message)
                                  -> HandleResult {
    let mut store = match self.store.take() {
      | Some(store) => store,
      | None => return HandleResult::code(Code::NOT_IMPLEMENTED),
    };

    let result = match msg.code {
      | Code::GET => match store.read(uri) {
        | Ok(value) => {
          resp.payload = Payload(value);
          match msg.observe() {
            | Some(_) => HandleResult::code(self.handle_observe_request(uri, session, msg, resp)),
            | None => HandleResult::code(Code::CONTENT),
          }
        },
        | Err(code) => HandleResult::code(code),
      },

      | Code::POST => {
        if uri.instance.is_none() {
          match store.create(uri, msg.payload.as_bytes()) {
            | Ok(instance) => {
              resp.add_location_segment(&uri.object.unwrap_or(0).to_string());
              resp.add_location_segment(&instance.to_string());
              HandleResult::code(Code::CREATED)
            },
            | Err(code) => HandleResult::code(code),
          }
        } else if uri.resource.is_none() {
          let (object, instance) = (uri.object.unwrap_or(0), uri.instance.unwrap_or(0));
          if store.is_instance_new(object, instance) {
            match store.create(uri, msg.payload.as_bytes()) {
              | Ok(_) => HandleResult::changed(Code::CHANGED),
              | Err(code) => HandleResult::code(code),
            }
          } else {
            match store.write(uri, msg.payload.as_bytes()) {
              | Code::CHANGED => HandleResult::changed(Code::CHANGED),
              | code => HandleResult::code(code),
            }
          }
        } else {
          HandleResult::code(store.execute(uri, msg.payload.as_bytes()))
        }
      },

      | Code::PUT => {
        if !msg.payload.is_empty() && uri.instance.is_some() {
          match store.write(uri, msg.payload.as_bytes()) {
            | Code::CHANGED => HandleResult::changed(Code::CHANGED),
            | code => HandleResult::code(code),
          }
        } else if msg.payload.is_empty() {
          let query = msg.queries()
                         .ok()
                         .filter(|qs| !qs.is_empty())
                         .map(|qs| qs.join("&"));
          match query {
            | Some(query) => HandleResult::code(store.write_attributes(uri, &query)),
            | None => HandleResult::code(Code::BAD_REQUEST),
          }
        } else {
          HandleResult::code(Code::BAD_REQUEST)
        }
      },

      | Code::DELETE => {
        if uri.instance.is_some() && uri.resource.is_none() {
          HandleResult::code(store.delete(uri))
        } else {
          HandleResult::code(Code::BAD_REQUEST)
        }
      },

      | _ => HandleResult::code(Code::BAD_REQUEST),
    };

    self.store = Some(store);
    result
  }

  fn dm_operation(&mut self,
                  client: u16,
                  uri: &Uri,
                  method: Code,
                  payload: Option<&[u8]>,
                  query: Option<&str>,
                  handler: Option<ResultHandler>)
                  -> Result<(), Error<T::Error>> {
    let blocksize = self.clients
                        .iter()
                        .find(|c| c.id == client)
                        .map(|c| c.blocksize)
                        .ok_or(Error::Status(Code::NOT_FOUND))?;

    let id = self.next_mid();
    let token = self.next_token(id);
    let mut tx =
      Transaction::new(Type::Con, method, Some(uri), id, token, PeerKey::Client(client), blocksize)
        .ok_or(Error::Status(Code::INTERNAL_SERVER_ERROR))?;

    if let Some(payload) = payload {
      tx.message.payload = Payload(payload.to_vec());
    }
    if let Some(query) = query {
      tx.message.add_query(query);
    }

    tx.purpose = Purpose::Operation { client, uri: *uri };
    tx.handler = handler;

    self.transaction_send(tx)
  }

  /// Read the value(s) at `uri` on a registered client (server role).
  ///
  /// `handler` fires exactly once: with the response, or with
  /// `5.03 Service Unavailable` and no payload if the dialog dies.
  pub fn dm_read(&mut self,
                 client: u16,
                 uri: &Uri,
                 handler: ResultHandler)
                 -> Result<(), Error<T::Error>> {
    self.dm_operation(client, uri, Code::GET, None, None, Some(handler))
  }

  /// Write `value` at `uri` on a registered client (server role).
  ///
  /// `uri` must address an instance or resource.
  pub fn dm_write(&mut self,
                  client: u16,
                  uri: &Uri,
                  value: &[u8],
                  handler: ResultHandler)
                  -> Result<(), Error<T::Error>> {
    if uri.instance.is_none() || value.is_empty() {
      return Err(Error::Status(Code::BAD_REQUEST));
    }

    let method = match uri.resource {
      | Some(_) => Code::PUT,
      | None => Code::POST,
    };
    self.dm_operation(client, uri, method, Some(value), None, Some(handler))
  }

  /// Write notification attributes at `uri` on a registered client
  /// (server role). `query` is the raw attribute query string
  /// (e.g. `"pmin=5&pmax=60"`).
  pub fn dm_attributes(&mut self,
                       client: u16,
                       uri: &Uri,
                       query: &str,
                       handler: ResultHandler)
                       -> Result<(), Error<T::Error>> {
    if uri.instance.is_none() || query.is_empty() {
      return Err(Error::Status(Code::BAD_REQUEST));
    }

    self.dm_operation(client, uri, Code::PUT, None, Some(query), Some(handler))
  }

  /// Execute the resource at `uri` on a registered client (server role).
  pub fn dm_execute(&mut self,
                    client: u16,
                    uri: &Uri,
                    args: &[u8],
                    handler: ResultHandler)
                    -> Result<(), Error<T::Error>> {
    if uri.resource.is_none() {
      return Err(Error::Status(Code::BAD_REQUEST));
    }

    self.dm_operation(client, uri, Code::POST, Some(args), None, Some(handler))
  }

  /// Create an object instance on a registered client (server role).
  ///
  /// On `2.01 Created` the handler sees the path the client placed the
  /// instance at (from the response Location-Path).
  pub fn dm_create(&mut self,
                   client: u16,
                   uri: &Uri,
                   value: &[u8],
                   handler: ResultHandler)
                   -> Result<(), Error<T::Error>> {
    if uri.resource.is_some() || value.is_empty() {
      return Err(Error::Status(Code::BAD_REQUEST));
    }

    self.dm_operation(client, uri, Code::POST, Some(value), None, Some(handler))
  }

  /// Delete an object instance on a registered client (server role).
  pub fn dm_delete(&mut self,
                   client: u16,
                   uri: &Uri,
                   handler: ResultHandler)
                   -> Result<(), Error<T::Error>> {
    if uri.instance.is_none() || uri.resource.is_some() {
      return Err(Error::Status(Code::BAD_REQUEST));
    }

    self.dm_operation(client, uri, Code::DELETE, None, None, Some(handler))
  }
}
